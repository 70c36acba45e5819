//! The per-call send chain.
//!
//! Every outbound operation becomes a unit appended to a queue; a single worker task
//! drains the queue and performs at most one transport write at a time. Appending is
//! the only point of synchronization, so the order in which callers append is exactly
//! the order on the wire, whichever task or thread they call from.
//!
//! Once a write fails, every unit behind it fails with the same error without touching
//! the transport.

use crate::error::CallError;
use crate::lifecycle::CallState;
use crate::shared::CallShared;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use streamcall_core::RequestHead;
use streamcall_transport::OutboundFrame;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Completion handle for one send, resolved when that send's write finishes.
pub type SendPromise = oneshot::Sender<Result<(), CallError>>;

/// Future form of a send's completion.
pub type SendFuture = BoxFuture<'static, Result<(), CallError>>;

/// Pair a promise with the future that observes it.
pub(crate) fn send_promise() -> (SendPromise, SendFuture) {
    let (promise, completion) = oneshot::channel();
    let future = async move { completion.await.unwrap_or(Err(CallError::Cancelled)) }.boxed();
    (promise, future)
}

pub(crate) fn complete(promise: Option<SendPromise>, result: Result<(), CallError>) {
    if let Some(promise) = promise {
        let _ = promise.send(result);
    }
}

#[derive(Debug)]
pub(crate) enum SendOp {
    Head(RequestHead),
    Message(Bytes),
    End,
    /// Writes nothing; settles once everything appended before it has settled.
    Barrier,
}

impl SendOp {
    fn kind(&self) -> &'static str {
        match self {
            SendOp::Head(_) => "head",
            SendOp::Message(_) => "message",
            SendOp::End => "end",
            SendOp::Barrier => "barrier",
        }
    }

    fn into_frame(self) -> Option<(OutboundFrame, CallState)> {
        match self {
            SendOp::Head(head) => Some((OutboundFrame::Head(head), CallState::HeaderSent)),
            SendOp::Message(bytes) => Some((OutboundFrame::Message(bytes), CallState::Streaming)),
            SendOp::End => Some((OutboundFrame::End, CallState::LocallyHalfClosed)),
            SendOp::Barrier => None,
        }
    }
}

struct SendUnit {
    op: SendOp,
    promise: Option<SendPromise>,
}

/// Append side of the chain. The worker runs until the call closes or every
/// `SendChain` handle is dropped.
pub(crate) struct SendChain {
    tail: mpsc::UnboundedSender<SendUnit>,
    call: Arc<CallShared>,
}

impl SendChain {
    pub fn start(call: Arc<CallShared>) -> Self {
        let (tail, queue) = mpsc::unbounded_channel();
        call.runtime.spawn(run_chain(call.clone(), queue));
        Self { tail, call }
    }

    pub fn append(&self, op: SendOp, promise: Option<SendPromise>) {
        trace!(call = %self.call.id, kind = op.kind(), "Appending send");
        if let Err(mpsc::error::SendError(unit)) = self.tail.send(SendUnit { op, promise }) {
            complete(unit.promise, Err(self.call.lifecycle.closed_error()));
        }
    }
}

async fn run_chain(call: Arc<CallShared>, mut queue: mpsc::UnboundedReceiver<SendUnit>) {
    let mut failure: Option<CallError> = None;
    let mut end_written = false;

    loop {
        let unit = tokio::select! {
            biased;
            _ = call.closed.cancelled() => break,
            unit = queue.recv() => match unit {
                Some(unit) => unit,
                None => return,
            },
        };
        let SendUnit { op, promise } = unit;

        if let Some(error) = &failure {
            trace!(call = %call.id, kind = op.kind(), "Failing send behind an earlier failure");
            complete(promise, Err(error.clone()));
            continue;
        }

        if end_written && matches!(op, SendOp::Message(_)) {
            complete(
                promise,
                Err(CallError::InvalidState {
                    operation: "send_message",
                    state: call.lifecycle.state(),
                }),
            );
            continue;
        }

        let Some((frame, next_state)) = op.into_frame() else {
            complete(promise, Ok(()));
            continue;
        };
        if matches!(frame, OutboundFrame::End) {
            end_written = true;
        }

        match write(&call, frame).await {
            Ok(()) => {
                call.lifecycle.advance(next_state);
                complete(promise, Ok(()));
            }
            Err(error) => {
                debug!(call = %call.id, error = %error, "Send failed");
                failure = Some(error.clone());
                complete(promise, Err(error.clone()));
                if matches!(error, CallError::Transport(_)) {
                    call.fail(error);
                }
            }
        }
    }

    // The call closed: nothing further reaches the transport.
    queue.close();
    let reason = call.lifecycle.closed_error();
    while let Some(unit) = queue.recv().await {
        complete(unit.promise, Err(reason.clone()));
    }
}

async fn write(call: &CallShared, frame: OutboundFrame) -> Result<(), CallError> {
    let Some(stream) = call.stream() else {
        return Err(call.lifecycle.closed_error());
    };
    if let Some(reason) = call.lifecycle.close_reason() {
        return Err(reason.clone());
    }
    trace!(call = %call.id, stream = %stream, kind = frame.kind(), "Writing frame");
    tokio::select! {
        biased;
        _ = call.closed.cancelled() => Err(call.lifecycle.closed_error()),
        result = call.transport.write(stream, frame) => result.map_err(CallError::from),
    }
}
