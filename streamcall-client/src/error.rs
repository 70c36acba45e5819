use crate::lifecycle::CallState;
use std::sync::Arc;
use streamcall_core::{CodecError, HeadError, Status, StatusCode};
use streamcall_transport::TransportError;
use thiserror::Error;

/// Everything that can go wrong with a call, short of the server's own status.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{operation} is not permitted while the call is {state}")]
    InvalidState {
        operation: &'static str,
        state: CallState,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("call cancelled")]
    Cancelled,

    #[error("call already completed with status {0}")]
    Completed(Status),

    #[error("invalid request header: {0}")]
    InvalidHeader(#[from] HeadError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("{0} was already resolved")]
    AlreadyResolved(&'static str),
}

impl CallError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CallError::Transport(_) => StatusCode::Unavailable,
            CallError::InvalidState { .. } => StatusCode::FailedPrecondition,
            CallError::DeadlineExceeded => StatusCode::DeadlineExceeded,
            CallError::Cancelled => StatusCode::Cancelled,
            CallError::Completed(status) => status.code,
            CallError::ProtocolViolation(_)
            | CallError::InvalidHeader(_)
            | CallError::Codec(_)
            | CallError::AlreadyResolved(_) => StatusCode::Internal,
        }
    }

    /// The status a call ends with when closed locally for this reason.
    pub fn to_status(&self) -> Status {
        match self {
            CallError::Completed(status) => status.clone(),
            other => Status::new(other.status_code(), other.to_string())
                .with_cause(Arc::new(other.clone())),
        }
    }

    /// Whether the error is a failure of the call machinery, as opposed to a caller
    /// mistake or a normal way for a call to end. Only these reach the error delegate.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CallError::Transport(_)
                | CallError::ProtocolViolation(_)
                | CallError::InvalidHeader(_)
                | CallError::Codec(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
