use super::{dropped_response, ClientCall, StreamingRequestClientCall};
use crate::base_call::BaseCall;
use crate::connection::Connection;
use crate::delivery::ResponseObserver;
use crate::outcome::{Outcome, OutcomeFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use streamcall_core::{CallOptions, Status};

/// A stream of requests answered by one response.
///
/// Nothing but the header is sent until the caller sends messages; the server answers
/// after [`StreamingRequestClientCall::send_end`].
pub struct ClientStreamingCall<Req, Resp> {
    base: BaseCall,
    response: Arc<Outcome<Result<Resp, Status>>>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Resp> ClientStreamingCall<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(connection: &Connection, path: &str, options: CallOptions) -> Self {
        let response = Arc::new(Outcome::new("response"));
        let base = BaseCall::start(
            connection,
            path,
            options,
            ResponseObserver::single(response.clone()),
        );
        Self {
            base,
            response,
            _request: PhantomData,
        }
    }

    pub fn response(&self) -> OutcomeFuture<Result<Resp, Status>> {
        let waiting = self.response.wait();
        async move { waiting.await.unwrap_or_else(dropped_response) }.boxed()
    }
}

impl<Req, Resp> ClientCall for ClientStreamingCall<Req, Resp> {
    fn base(&self) -> &BaseCall {
        &self.base
    }
}

impl<Req: Serialize, Resp> StreamingRequestClientCall<Req> for ClientStreamingCall<Req, Resp> {}

impl<Req, Resp> fmt::Debug for ClientStreamingCall<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientStreamingCall").field(&self.base).finish()
    }
}
