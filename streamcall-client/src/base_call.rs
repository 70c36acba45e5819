use crate::connection::Connection;
use crate::delivery::{inbound_handler, ResponseObserver, ResponseSink};
use crate::error::CallError;
use crate::lifecycle::CallState;
use crate::outcome::OutcomeFuture;
use crate::send_chain::{complete, SendChain, SendOp, SendPromise};
use crate::shared::CallShared;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use streamcall_core::{encode_message_frame, CallId, CallOptions, Metadata, RequestHead, Status};
use streamcall_transport::{CloseMode, InboundFrame, TransportError};
use tokio::sync::mpsc;
use tracing::debug;

/// The machinery every call shape is built on: the send chain, the lifecycle, the
/// delivery task and the three one-shot outcomes.
///
/// A `BaseCall` is created with its request header already queued, so the header is
/// always the first frame written for the call.
pub struct BaseCall {
    call: Arc<CallShared>,
    chain: SendChain,
}

impl BaseCall {
    pub(crate) fn start<Resp>(
        connection: &Connection,
        path: &str,
        options: CallOptions,
        observer: ResponseObserver<Resp>,
    ) -> Self
    where
        Resp: DeserializeOwned + Send + 'static,
    {
        let started_at = Instant::now();
        let deadline = connection.deadline_for(&options, started_at);
        let call = connection.register(path);
        let chain = SendChain::start(call.clone());
        let base = BaseCall { call, chain };

        match base.open(connection, &options, deadline) {
            Ok(frames) => {
                let sink = ResponseSink {
                    call: base.call.clone(),
                    observer,
                    frames,
                    deadline,
                };
                base.call.runtime.spawn(sink.run());
            }
            Err(error) => {
                debug!(call = %base.call.id, error = %error, "Call failed to start");
                base.call.fail(error);
                let status = base
                    .call
                    .outcomes
                    .status
                    .peek()
                    .unwrap_or_else(|| base.call.lifecycle.closed_error().to_status());
                observer.finish(&status);
            }
        }
        base
    }

    fn open(
        &self,
        connection: &Connection,
        options: &CallOptions,
        deadline: Option<Instant>,
    ) -> Result<mpsc::UnboundedReceiver<InboundFrame>, CallError> {
        if connection.is_shut_down() {
            return Err(CallError::Transport(TransportError::ConnectionClosed));
        }

        let remaining = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    return Err(CallError::DeadlineExceeded);
                }
                Some(deadline - now)
            }
            None => None,
        };

        let head = RequestHead::build(&self.call.path, connection.authority(), options, remaining)?;
        let transport = connection.transport();
        let stream = transport.open_stream(&head)?;
        self.call.set_stream(stream);
        // A close that ran before the stream was assigned could not release it.
        if self.call.lifecycle.is_closed() {
            self.call.close_stream(stream, CloseMode::Forced);
            return Err(self.call.lifecycle.closed_error());
        }

        let (frames_tx, frames) = mpsc::unbounded_channel();
        transport.register_inbound_handler(stream, inbound_handler(frames_tx))?;

        debug!(call = %self.call.id, stream = %stream, path = %self.call.path, "Call started");
        self.send_head(head);
        Ok(frames)
    }

    fn send_head(&self, head: RequestHead) {
        self.chain.append(SendOp::Head(head), None);
    }

    pub fn call_id(&self) -> CallId {
        self.call.id
    }

    pub fn path(&self) -> &str {
        &self.call.path
    }

    pub fn state(&self) -> CallState {
        self.call.lifecycle.state()
    }

    /// Serialize `message` and queue it behind everything already sent.
    pub fn send_message<Req: Serialize>(&self, message: &Req, promise: Option<SendPromise>) {
        if let Err(error) = self.call.lifecycle.check_can_send("send_message") {
            complete(promise, Err(error));
            return;
        }
        match encode_message_frame(message) {
            Ok(frame) => self.chain.append(SendOp::Message(frame), promise),
            Err(error) => complete(promise, Err(CallError::Codec(error))),
        }
    }

    /// Queue the end of the request stream. Only the first request is accepted.
    pub fn send_end(&self, promise: Option<SendPromise>) {
        match self.call.lifecycle.request_end() {
            Ok(()) => self.chain.append(SendOp::End, promise),
            Err(error) => complete(promise, Err(error)),
        }
    }

    /// Settle `promise` once every send queued so far has settled.
    pub fn pending_sends_settled(&self, promise: SendPromise) {
        self.chain.append(SendOp::Barrier, Some(promise));
    }

    pub fn initial_metadata(&self) -> OutcomeFuture<Result<Metadata, Status>> {
        let waiting = self.call.outcomes.initial_metadata.wait();
        async move { waiting.await.unwrap_or_else(|| Err(dropped_status())) }.boxed()
    }

    pub fn status(&self) -> OutcomeFuture<Status> {
        let waiting = self.call.outcomes.status.wait();
        async move { waiting.await.unwrap_or_else(dropped_status) }.boxed()
    }

    pub fn trailing_metadata(&self) -> OutcomeFuture<Result<Metadata, Status>> {
        let waiting = self.call.outcomes.trailing_metadata.wait();
        async move { waiting.await.unwrap_or_else(|| Err(dropped_status())) }.boxed()
    }

    /// Cancel the call. Later cancels, and cancels of a closed call, do nothing.
    pub fn cancel(&self) {
        if self.call.close(CallError::Cancelled) {
            debug!(call = %self.call.id, "Call cancelled");
        }
    }
}

fn dropped_status() -> Status {
    Status::cancelled("call was dropped before it completed")
}

impl fmt::Debug for BaseCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseCall")
            .field("id", &self.call.id)
            .field("path", &self.call.path)
            .field("state", &self.state())
            .finish()
    }
}
