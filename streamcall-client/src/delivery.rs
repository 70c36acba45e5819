use crate::error::CallError;
use crate::outcome::Outcome;
use crate::shared::CallShared;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use streamcall_core::{decode_message_frame, Status, StatusCode};
use streamcall_transport::{InboundFrame, InboundHandler, TransportError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Where decoded response messages go.
pub(crate) struct ResponseObserver<Resp> {
    on_message: Box<dyn FnMut(Resp) -> Result<(), CallError> + Send>,
    on_finish: Option<Box<dyn FnOnce(&Status) + Send>>,
}

impl<Resp: Send + 'static> ResponseObserver<Resp> {
    /// Streaming responses: every message, in arrival order.
    pub fn handler<F>(mut handler: F) -> Self
    where
        F: FnMut(Resp) + Send + 'static,
    {
        Self {
            on_message: Box::new(move |message| {
                handler(message);
                Ok(())
            }),
            on_finish: None,
        }
    }

    fn deliver(&mut self, message: Resp) -> Result<(), CallError> {
        (self.on_message)(message)
    }

    /// Called once, after the call closed.
    pub fn finish(self, status: &Status) {
        if let Some(on_finish) = self.on_finish {
            on_finish(status);
        }
    }
}

impl<Resp: Clone + Send + Sync + 'static> ResponseObserver<Resp> {
    /// Single-response calls: exactly one message, otherwise the failure status.
    pub fn single(response: Arc<Outcome<Result<Resp, Status>>>) -> Self {
        let on_finish = response.clone();
        Self {
            on_message: Box::new(move |message| {
                response.resolve(Ok(message)).map_err(|_| {
                    CallError::ProtocolViolation(
                        "received more than one response message for a single-response call"
                            .into(),
                    )
                })
            }),
            on_finish: Some(Box::new(move |status: &Status| {
                let failure = if status.is_ok() {
                    Status::new(
                        StatusCode::Internal,
                        "call completed without a response message",
                    )
                } else {
                    status.clone()
                };
                let _ = on_finish.resolve(Err(failure));
            })),
        }
    }
}

/// Inbound handler that forwards frames, in arrival order, to the delivery task.
pub(crate) fn inbound_handler(frames: mpsc::UnboundedSender<InboundFrame>) -> InboundHandler {
    Arc::new(move |frame: InboundFrame| {
        if let Err(mpsc::error::SendError(frame)) = frames.send(frame) {
            trace!(kind = frame.kind(), "Dropping frame for a finished call");
        }
    })
}

/// Delivery task: owns the observer and turns inbound frames into outcomes and
/// delivered messages until the call closes.
pub(crate) struct ResponseSink<Resp> {
    pub call: Arc<CallShared>,
    pub observer: ResponseObserver<Resp>,
    pub frames: mpsc::UnboundedReceiver<InboundFrame>,
    pub deadline: Option<Instant>,
}

impl<Resp> ResponseSink<Resp>
where
    Resp: DeserializeOwned + Send + 'static,
{
    pub async fn run(mut self) {
        let deadline = self.deadline.map(tokio::time::Instant::from_std);
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.call.closed.cancelled() => break,
                _ = deadline_elapsed(deadline) => {
                    debug!(call = %self.call.id, "Deadline exceeded");
                    self.call.close(CallError::DeadlineExceeded);
                    break;
                }
                frame = self.frames.recv() => frame,
            };
            let keep_going = match frame {
                Some(frame) => self.handle(frame),
                None => {
                    debug!(call = %self.call.id, "Inbound stream ended without a status");
                    self.call
                        .fail(CallError::Transport(TransportError::ConnectionClosed));
                    false
                }
            };
            if !keep_going {
                break;
            }
        }

        self.frames.close();
        let status = self
            .call
            .outcomes
            .status
            .peek()
            .unwrap_or_else(|| self.call.lifecycle.closed_error().to_status());
        self.observer.finish(&status);
    }

    fn handle(&mut self, frame: InboundFrame) -> bool {
        trace!(call = %self.call.id, kind = frame.kind(), "Inbound frame");
        match frame {
            InboundFrame::Headers(metadata) => {
                if self.call.outcomes.initial_metadata.resolve(Ok(metadata)).is_err() {
                    return self.violation("received initial metadata more than once");
                }
                true
            }
            InboundFrame::Message(bytes) => {
                if !self.call.outcomes.initial_metadata.is_resolved() {
                    return self.violation("received a response message before initial metadata");
                }
                let message = match decode_message_frame::<Resp>(
                    &bytes,
                    self.call.max_response_message_size,
                ) {
                    Ok(message) => message,
                    Err(error) => {
                        self.call.fail(CallError::Codec(error));
                        return false;
                    }
                };
                if let Err(error) = self.observer.deliver(message) {
                    self.call.fail(error);
                    return false;
                }
                true
            }
            InboundFrame::Status { status, trailers } => {
                self.call.finish(status, trailers);
                false
            }
            InboundFrame::Failed(error) => {
                self.call.fail(CallError::Transport(error));
                false
            }
        }
    }

    fn violation(&self, message: &str) -> bool {
        self.call
            .fail(CallError::ProtocolViolation(message.to_string()));
        false
    }
}

async fn deadline_elapsed(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
