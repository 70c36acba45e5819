use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Trailer carrying the numeric status code.
pub const GRPC_STATUS_HEADER: &str = "grpc-status";
/// Trailer carrying the percent-encoded status message.
pub const GRPC_MESSAGE_HEADER: &str = "grpc-message";

/// gRPC status codes (<https://grpc.github.io/grpc/core/md_doc_statuscodes.html>).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusCodeError {
    #[error("status code out of range: {0}")]
    OutOfRange(u32),
    #[error("status code is not a number: {0:?}")]
    NotANumber(String),
}

impl StatusCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl TryFrom<u32> for StatusCode {
    type Error = StatusCodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            other => return Err(StatusCodeError::OutOfRange(other)),
        };
        Ok(code)
    }
}

impl std::str::FromStr for StatusCode {
    type Err = StatusCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| StatusCodeError::NotANumber(s.to_string()))?;
        StatusCode::try_from(value)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        };
        write!(f, "{}", s)
    }
}

/// Terminal outcome of a call.
///
/// A non-OK status is a normal result of an RPC and is not, on its own, an error of the
/// client machinery. The optional `cause` carries the local error that produced the
/// status, if any.
#[derive(Clone)]
pub struct Status {
    pub code: StatusCode,
    pub message: Option<String>,
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: Some(message.into()),
            cause: None,
        }
    }

    pub fn ok() -> Self {
        Status {
            code: StatusCode::Ok,
            message: None,
            cause: None,
        }
    }

    pub fn from_code(code: StatusCode) -> Self {
        Status {
            code,
            message: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Arc<dyn StdError + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Build a status from response trailers.
    ///
    /// A missing `grpc-status` trailer yields `UNKNOWN`, as does an unparsable one.
    pub fn from_trailers(trailers: &Metadata) -> Self {
        let code = match trailers.get(GRPC_STATUS_HEADER) {
            Some(raw) => raw.parse().unwrap_or(StatusCode::Unknown),
            None => {
                return Status::new(StatusCode::Unknown, "missing grpc-status trailer");
            }
        };
        let message = trailers.get(GRPC_MESSAGE_HEADER).map(percent_decode);
        Status {
            code,
            message,
            cause: None,
        }
    }

    /// Write this status into `trailers` using the standard trailer names.
    pub fn write_trailers(&self, trailers: &mut Metadata) {
        trailers.set_reserved(GRPC_STATUS_HEADER, self.code.as_u8().to_string());
        if let Some(message) = &self.message {
            trailers.set_reserved(GRPC_MESSAGE_HEADER, percent_encode(message));
        }
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl StdError for Status {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<StatusCode> for Status {
    fn from(code: StatusCode) -> Self {
        Status::from_code(code)
    }
}

// grpc-message is percent-encoded: every byte outside printable ASCII, and '%' itself.
fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn percent_decode(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}
