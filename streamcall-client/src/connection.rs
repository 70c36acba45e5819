use crate::config::ClientConfig;
use crate::delegate::ClientErrorDelegate;
use crate::error::{CallError, ConnectionError};
use crate::shared::{CallRegistry, CallShared, CallSharedParts};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use streamcall_core::{Authority, CallIdAllocator, CallOptions};
use streamcall_transport::Transport;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// A client connection: the transport every call runs on, plus the calls currently
/// alive on it.
///
/// Cloning is cheap and every clone refers to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    authority: Authority,
    runtime: Handle,
    ids: CallIdAllocator,
    calls: Arc<CallRegistry>,
    error_delegate: RwLock<Option<Arc<dyn ClientErrorDelegate>>>,
    shut_down: AtomicBool,
}

impl Connection {
    /// Create a connection whose call tasks run on the current tokio runtime.
    pub fn new<T: Transport>(transport: T, config: ClientConfig) -> Result<Self, ConnectionError> {
        Ok(Self::with_runtime(transport, config, Handle::try_current()?))
    }

    pub fn with_runtime<T: Transport>(transport: T, config: ClientConfig, runtime: Handle) -> Self {
        info!(host = %config.host, scheme = %config.scheme, "Creating connection");
        let authority = config.authority();
        Self {
            inner: Arc::new(ConnectionInner {
                transport: Arc::new(transport),
                config,
                authority,
                runtime,
                ids: CallIdAllocator::new(),
                calls: Arc::new(CallRegistry::new()),
                error_delegate: RwLock::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Delegate notified of infrastructure failures on calls created from now on.
    pub fn set_error_delegate(&self, delegate: Arc<dyn ClientErrorDelegate>) {
        let mut slot = match self.inner.error_delegate.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(delegate);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn authority(&self) -> &Authority {
        &self.inner.authority
    }

    /// Calls started on this connection that have not closed yet.
    pub fn active_calls(&self) -> usize {
        self.inner.calls.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Cancel every live call and refuse new ones. Returns the number of calls
    /// cancelled.
    pub fn shutdown(&self) -> usize {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        // Snapshot first: closing a call removes it from the registry.
        let live: Vec<Arc<CallShared>> = self
            .inner
            .calls
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        let cancelled = live
            .iter()
            .filter(|call| call.close(CallError::Cancelled))
            .count();
        info!(cancelled, "Connection shut down");
        cancelled
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Deadline for a call started at `started_at`, falling back to the configured
    /// default timeout when the options set neither a timeout nor a deadline.
    pub(crate) fn deadline_for(&self, options: &CallOptions, started_at: Instant) -> Option<Instant> {
        if options.timeout.is_none() && options.deadline.is_none() {
            return self
                .inner
                .config
                .default_timeout()
                .and_then(|timeout| started_at.checked_add(timeout));
        }
        options.effective_deadline(started_at)
    }

    /// Allocate and register the shared state of a new call.
    pub(crate) fn register(&self, path: &str) -> Arc<CallShared> {
        let error_delegate = match self.inner.error_delegate.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let id = self.inner.ids.allocate();
        let call = Arc::new(CallShared::new(CallSharedParts {
            id,
            path: path.to_string(),
            transport: self.inner.transport.clone(),
            runtime: self.inner.runtime.clone(),
            max_response_message_size: self.inner.config.max_response_message_size,
            error_delegate,
            registry: Arc::downgrade(&self.inner.calls),
        }));
        self.inner.calls.insert(id, Arc::downgrade(&call));
        debug!(call = %id, path, "Call registered");
        call
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("authority", &self.inner.authority)
            .field("active_calls", &self.active_calls())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
