use crate::delegate::ClientErrorDelegate;
use crate::error::CallError;
use crate::lifecycle::CallLifecycle;
use crate::outcome::Outcome;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock, Weak};
use streamcall_core::{CallId, Metadata, Status};
use streamcall_transport::{CloseMode, StreamHandle, Transport};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Live calls of one connection, keyed by id.
pub(crate) type CallRegistry = DashMap<CallId, Weak<CallShared>>;

pub(crate) struct CallOutcomes {
    pub initial_metadata: Outcome<Result<Metadata, Status>>,
    pub status: Outcome<Status>,
    pub trailing_metadata: Outcome<Result<Metadata, Status>>,
}

impl CallOutcomes {
    fn new() -> Self {
        Self {
            initial_metadata: Outcome::new("initial metadata"),
            status: Outcome::new("status"),
            trailing_metadata: Outcome::new("trailing metadata"),
        }
    }
}

/// State shared by a call handle, its send worker and its delivery task.
pub(crate) struct CallShared {
    pub id: CallId,
    pub path: String,
    pub lifecycle: CallLifecycle,
    pub outcomes: CallOutcomes,
    /// Cancelled exactly once, when the call closes.
    pub closed: CancellationToken,
    pub transport: Arc<dyn Transport>,
    pub runtime: Handle,
    pub max_response_message_size: usize,
    stream: OnceLock<StreamHandle>,
    error_delegate: Option<Arc<dyn ClientErrorDelegate>>,
    registry: Weak<CallRegistry>,
}

pub(crate) struct CallSharedParts {
    pub id: CallId,
    pub path: String,
    pub transport: Arc<dyn Transport>,
    pub runtime: Handle,
    pub max_response_message_size: usize,
    pub error_delegate: Option<Arc<dyn ClientErrorDelegate>>,
    pub registry: Weak<CallRegistry>,
}

impl CallShared {
    pub fn new(parts: CallSharedParts) -> Self {
        Self {
            id: parts.id,
            path: parts.path,
            lifecycle: CallLifecycle::new(),
            outcomes: CallOutcomes::new(),
            closed: CancellationToken::new(),
            transport: parts.transport,
            runtime: parts.runtime,
            max_response_message_size: parts.max_response_message_size,
            stream: OnceLock::new(),
            error_delegate: parts.error_delegate,
            registry: parts.registry,
        }
    }

    pub fn stream(&self) -> Option<StreamHandle> {
        self.stream.get().copied()
    }

    pub fn set_stream(&self, stream: StreamHandle) {
        if self.stream.set(stream).is_err() {
            debug!(call = %self.id, "Stream already assigned");
        }
    }

    fn report(&self, error: &CallError) {
        if let Some(delegate) = &self.error_delegate {
            delegate.did_catch_error(self.id, error);
        }
    }

    /// Close the call because of a failure. Infrastructure failures are reported to
    /// the error delegate, but only by the close that actually wins.
    pub fn fail(&self, error: CallError) -> bool {
        let report = error.is_infrastructure().then(|| error.clone());
        let closed = self.close(error);
        if closed {
            if let Some(error) = report {
                self.report(&error);
            }
        }
        closed
    }

    /// Close the call locally. The status, and any outcome not yet resolved, take
    /// their value from `reason`.
    pub fn close(&self, reason: CallError) -> bool {
        let status = reason.to_status();
        if !self.lifecycle.close(reason) {
            return false;
        }
        debug!(call = %self.id, path = %self.path, code = %status.code, "Call closed locally");
        self.settle(status.clone(), Err(status), CloseMode::Forced);
        true
    }

    /// Close the call with the server's final status.
    pub fn finish(&self, status: Status, trailers: Metadata) -> bool {
        if !self.lifecycle.close(CallError::Completed(status.clone())) {
            return false;
        }
        debug!(call = %self.id, path = %self.path, code = %status.code, "Call completed");
        self.settle(status, Ok(trailers), CloseMode::Graceful);
        true
    }

    fn settle(&self, status: Status, trailers: Result<Metadata, Status>, mode: CloseMode) {
        // Initial metadata settles first; it fails with the status if the server never
        // sent headers. Status always resolves before trailing metadata.
        let _ = self.outcomes.initial_metadata.resolve(Err(status.clone()));
        if let Err(error) = self.outcomes.status.resolve(status) {
            debug!(call = %self.id, error = %error, "Status resolved twice");
        }
        if let Err(error) = self.outcomes.trailing_metadata.resolve(trailers) {
            debug!(call = %self.id, error = %error, "Trailing metadata resolved twice");
        }

        self.closed.cancel();

        if let Some(stream) = self.stream() {
            self.close_stream(stream, mode);
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }

    pub fn close_stream(&self, stream: StreamHandle, mode: CloseMode) {
        let transport = self.transport.clone();
        let id = self.id;
        self.runtime.spawn(async move {
            if let Err(error) = transport.close(stream, mode).await {
                trace!(call = %id, error = %error, "Stream close failed");
            }
        });
    }
}
