//! Client-side lifecycle for streaming RPC calls.
//!
//! A call is started on a [`Connection`] in one of four shapes. Every call writes its
//! request header first, writes messages in exactly the order they were sent, and
//! ends with a status that resolves once. Response messages reach the caller in
//! arrival order, all of them before the status.

pub mod base_call;
pub mod calls;
pub mod config;
pub mod connection;
pub mod delegate;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod outcome;
pub mod send_chain;

mod delivery;
mod shared;

pub use base_call::BaseCall;
pub use calls::{
    BidirectionalStreamingCall, ClientCall, ClientStreamingCall, ResponseStream,
    ServerStreamingCall, StreamingRequestClientCall, UnaryCall,
};
pub use config::ClientConfig;
pub use connection::Connection;
pub use delegate::{ClientErrorDelegate, LoggingErrorDelegate};
pub use error::{CallError, ConnectionError};
pub use lifecycle::CallState;
pub use outcome::OutcomeFuture;
pub use send_chain::{SendFuture, SendPromise};

pub use streamcall_core::{CallId, CallOptions, Metadata, Status, StatusCode};
pub use streamcall_transport::{MemoryTransport, Transport, TransportError};
