use crate::metadata::Metadata;
use std::time::{Duration, Instant};

/// Per-call options.
///
/// `timeout` is relative to call construction; `deadline` is absolute. When both are
/// set the earlier one wins.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Additional request headers, written after the protocol headers.
    pub custom_metadata: Metadata,
    pub timeout: Option<Duration>,
    pub deadline: Option<Instant>,
    /// Response encodings advertised in `grpc-accept-encoding`. Requests are always
    /// sent uncompressed.
    pub accept_encodings: Vec<String>,
    /// Marks the call safe to send as `GET` so intermediaries may cache it.
    pub cacheable: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.custom_metadata = metadata;
        self
    }

    pub fn with_accept_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.accept_encodings.push(encoding.into());
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Absolute deadline for a call started at `started_at`.
    pub fn effective_deadline(&self, started_at: Instant) -> Option<Instant> {
        let from_timeout = self
            .timeout
            .and_then(|timeout| started_at.checked_add(timeout));
        match (from_timeout, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
