use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use streamcall_core::{Metadata, RequestHead, Status};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Unknown stream {0}")]
    UnknownStream(StreamHandle),
    #[error("Stream {0} is closed")]
    StreamClosed(StreamHandle),
    #[error("Stream refused: {0}")]
    StreamRefused(String),
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(Arc::new(err))
    }
}

/// Identifies one call's stream within a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(u32);

impl StreamHandle {
    pub const fn new(id: u32) -> Self {
        StreamHandle(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamHandle({})", self.0)
    }
}

/// What a call writes to its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// The request header. Always the first frame of a stream.
    Head(RequestHead),
    /// One length-prefixed request message.
    Message(Bytes),
    /// End of the request stream (half-close).
    End,
}

impl OutboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Head(_) => "head",
            OutboundFrame::Message(_) => "message",
            OutboundFrame::End => "end",
        }
    }
}

/// What the transport delivers for a stream, in arrival order.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Response headers (initial metadata).
    Headers(Metadata),
    /// One length-prefixed response message.
    Message(Bytes),
    /// The terminal frame: status plus trailing metadata.
    Status { status: Status, trailers: Metadata },
    /// The stream failed below the RPC layer (reset, connection loss).
    Failed(TransportError),
}

impl InboundFrame {
    /// Terminal frame built from raw trailers carrying `grpc-status`.
    pub fn from_trailers(trailers: Metadata) -> Self {
        InboundFrame::Status {
            status: Status::from_trailers(&trailers),
            trailers,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Headers(_) => "headers",
            InboundFrame::Message(_) => "message",
            InboundFrame::Status { .. } => "status",
            InboundFrame::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Let in-flight frames drain.
    Graceful,
    /// Reset the stream immediately.
    Forced,
}

/// Callback the transport invokes once per inbound frame, in arrival order.
pub type InboundHandler = Arc<dyn Fn(InboundFrame) + Send + Sync>;

/// The connection-level collaborator a call runs on.
///
/// Implementations own multiplexing, flow control and connection setup. A call opens
/// one stream, registers one inbound handler, writes frames one at a time and closes
/// the stream when it finishes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the wire context for a call.
    fn open_stream(&self, head: &RequestHead) -> Result<StreamHandle, TransportError>;

    /// Route inbound frames for `stream` to `handler`.
    fn register_inbound_handler(
        &self,
        stream: StreamHandle,
        handler: InboundHandler,
    ) -> Result<(), TransportError>;

    /// Write one frame. Completes once the transport accepted it.
    async fn write(&self, stream: StreamHandle, frame: OutboundFrame) -> Result<(), TransportError>;

    /// Terminate the stream. Closing an already closed stream succeeds.
    async fn close(&self, stream: StreamHandle, mode: CloseMode) -> Result<(), TransportError>;
}
