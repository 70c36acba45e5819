//! The four call shapes, and the traits they share.

pub mod bidirectional_streaming;
pub mod client_streaming;
pub mod server_streaming;
pub mod unary;

use crate::base_call::BaseCall;
use crate::lifecycle::CallState;
use crate::outcome::OutcomeFuture;
use crate::send_chain::{send_promise, SendFuture, SendPromise};
use futures::channel::mpsc as futures_mpsc;
use futures::future::try_join_all;
use futures::{FutureExt, Stream};
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use streamcall_core::{CallId, Metadata, Status};

pub use bidirectional_streaming::BidirectionalStreamingCall;
pub use client_streaming::ClientStreamingCall;
pub use server_streaming::ServerStreamingCall;
pub use unary::UnaryCall;

/// Operations common to every call shape.
pub trait ClientCall {
    /// The machinery behind this call.
    fn base(&self) -> &BaseCall;

    fn call_id(&self) -> CallId {
        self.base().call_id()
    }

    fn path(&self) -> &str {
        self.base().path()
    }

    fn state(&self) -> CallState {
        self.base().state()
    }

    /// Response headers, or the final status if the call ended without any.
    fn initial_metadata(&self) -> OutcomeFuture<Result<Metadata, Status>> {
        self.base().initial_metadata()
    }

    fn status(&self) -> OutcomeFuture<Status> {
        self.base().status()
    }

    /// Resolves after the status. Fails with the status when the call was closed
    /// locally.
    fn trailing_metadata(&self) -> OutcomeFuture<Result<Metadata, Status>> {
        self.base().trailing_metadata()
    }

    fn cancel(&self) {
        self.base().cancel()
    }
}

/// Sending side of calls whose requests are a stream.
pub trait StreamingRequestClientCall<Req: Serialize>: ClientCall {
    fn send_message(&self, message: &Req) -> SendFuture {
        let (promise, completion) = send_promise();
        self.base().send_message(message, Some(promise));
        completion
    }

    /// Send without waiting; `promise`, if given, receives the write's result.
    fn send_message_with(&self, message: &Req, promise: Option<SendPromise>) {
        self.base().send_message(message, promise)
    }

    /// Queue every message in order. Resolves once all of them were written, or with
    /// the first failure.
    fn send_messages<I>(&self, messages: I) -> SendFuture
    where
        I: IntoIterator<Item = Req>,
        Self: Sized,
    {
        let completions: Vec<SendFuture> = messages
            .into_iter()
            .map(|message| self.send_message(&message))
            .collect();
        try_join_all(completions).map(|result| result.map(|_| ())).boxed()
    }

    fn send_end(&self) -> SendFuture {
        let (promise, completion) = send_promise();
        self.base().send_end(Some(promise));
        completion
    }

    fn send_end_with(&self, promise: Option<SendPromise>) {
        self.base().send_end(promise)
    }

    /// Resolves once every send queued before this call has settled; fails with the
    /// error that broke the chain, if any.
    fn pending_sends_settled(&self) -> SendFuture {
        let (promise, completion) = send_promise();
        self.base().pending_sends_settled(promise);
        completion
    }
}

/// Pull-based view of a streaming call's responses. Ends when the call closes.
#[derive(Debug)]
pub struct ResponseStream<Resp> {
    messages: futures_mpsc::UnboundedReceiver<Resp>,
}

impl<Resp: Send + 'static> ResponseStream<Resp> {
    pub(crate) fn channel() -> (impl FnMut(Resp) + Send + 'static, Self) {
        let (sender, messages) = futures_mpsc::unbounded();
        let handler = move |message: Resp| {
            // The receiving side may have been dropped; the call carries on regardless.
            let _ = sender.unbounded_send(message);
        };
        (handler, Self { messages })
    }
}

impl<Resp> Stream for ResponseStream<Resp> {
    type Item = Resp;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.messages).poll_next(cx)
    }
}

pub(crate) fn dropped_response<Resp>() -> Result<Resp, Status> {
    Err(Status::cancelled("call was dropped before it completed"))
}
