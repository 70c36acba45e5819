use crate::error::CallError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

/// Where a call is in its life. States only move forward; `Closed` is terminal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallState {
    Created = 0,
    HeaderSent = 1,
    Streaming = 2,
    LocallyHalfClosed = 3,
    Closed = 4,
}

impl CallState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CallState::Created,
            1 => CallState::HeaderSent,
            2 => CallState::Streaming,
            3 => CallState::LocallyHalfClosed,
            _ => CallState::Closed,
        }
    }

    pub fn is_closed(self) -> bool {
        self == CallState::Closed
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Created => "created",
            CallState::HeaderSent => "header-sent",
            CallState::Streaming => "streaming",
            CallState::LocallyHalfClosed => "locally half-closed",
            CallState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lock-free state machine shared by a call's handle, send worker and delivery task.
#[derive(Debug)]
pub(crate) struct CallLifecycle {
    state: AtomicU8,
    end_requested: AtomicBool,
    close_reason: OnceLock<CallError>,
}

impl CallLifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(CallState::Created as u8),
            end_requested: AtomicBool::new(false),
            close_reason: OnceLock::new(),
        }
    }

    pub fn state(&self) -> CallState {
        if self.close_reason.get().is_some() {
            return CallState::Closed;
        }
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move forward to `to` after a successful write. Never moves backwards and never
    /// closes; use [`CallLifecycle::close`] for that.
    pub fn advance(&self, to: CallState) -> CallState {
        let target = to.min(CallState::LocallyHalfClosed) as u8;
        CallState::from_u8(self.state.fetch_max(target, Ordering::AcqRel))
    }

    /// Close the call. Returns `true` for the first close only; later reasons are
    /// dropped.
    pub fn close(&self, reason: CallError) -> bool {
        if self.close_reason.set(reason).is_err() {
            return false;
        }
        self.state.store(CallState::Closed as u8, Ordering::Release);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason.get().is_some()
    }

    pub fn close_reason(&self) -> Option<&CallError> {
        self.close_reason.get()
    }

    /// The error handed to sends that arrive after the call closed.
    pub fn closed_error(&self) -> CallError {
        self.close_reason.get().cloned().unwrap_or(CallError::Cancelled)
    }

    /// Gate for appending a message to the send chain.
    pub fn check_can_send(&self, operation: &'static str) -> Result<(), CallError> {
        if let Some(reason) = self.close_reason.get() {
            return Err(reason.clone());
        }
        if self.end_requested.load(Ordering::Acquire) {
            return Err(CallError::InvalidState {
                operation,
                state: CallState::LocallyHalfClosed,
            });
        }
        Ok(())
    }

    /// Claim the single end-of-stream slot.
    pub fn request_end(&self) -> Result<(), CallError> {
        if let Some(reason) = self.close_reason.get() {
            return Err(reason.clone());
        }
        if self.end_requested.swap(true, Ordering::AcqRel) {
            return Err(CallError::InvalidState {
                operation: "send_end",
                state: self.state(),
            });
        }
        Ok(())
    }
}

impl Default for CallLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
