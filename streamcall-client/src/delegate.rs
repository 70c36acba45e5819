use crate::error::CallError;
use streamcall_core::CallId;
use tracing::warn;

/// Observer for failures of the call machinery itself: transport errors, protocol
/// violations, undecodable responses and header construction failures.
///
/// Normal completions, cancellation and deadline expiry are not reported here; they
/// are visible through the call's status.
pub trait ClientErrorDelegate: Send + Sync {
    fn did_catch_error(&self, call: CallId, error: &CallError);
}

/// Delegate that writes each failure to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorDelegate;

impl ClientErrorDelegate for LoggingErrorDelegate {
    fn did_catch_error(&self, call: CallId, error: &CallError) {
        warn!(call = %call, code = %error.status_code(), error = %error, "Call failed");
    }
}

impl<F> ClientErrorDelegate for F
where
    F: Fn(CallId, &CallError) + Send + Sync,
{
    fn did_catch_error(&self, call: CallId, error: &CallError) {
        self(call, error)
    }
}
