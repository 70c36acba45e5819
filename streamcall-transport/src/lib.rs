pub mod memory;
pub mod transport;

pub use memory::{MemoryTransport, RecordedWrite, Responder};
pub use transport::{
    CloseMode, InboundFrame, InboundHandler, OutboundFrame, StreamHandle, Transport,
    TransportError,
};
