use super::{dropped_response, ClientCall};
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

/// One request, one response.
pub struct UnaryCall<Req, Resp> {
    base: BaseCall,
    response: Arc<Outcome<Result<Resp, Status>>>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Resp> UnaryCall<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Start the call and send `request` followed by the end of the request stream.
    pub fn new(connection: &Connection, path: &str, request: &Req, options: CallOptions) -> Self {
        let response = Arc::new(Outcome::new("response"));
        let base = BaseCall::start(
            connection,
            path,
            options,
            ResponseObserver::single(response.clone()),
        );
        base.send_message(request, None);
        base.send_end(None);
        Self {
            base,
            response,
            _request: PhantomData,
        }
    }

    /// The single response message, or the status the call failed with.
    pub fn response(&self) -> OutcomeFuture<Result<Resp, Status>> {
        let waiting = self.response.wait();
        async move { waiting.await.unwrap_or_else(dropped_response) }.boxed()
    }
}

impl<Req, Resp> ClientCall for UnaryCall<Req, Resp> {
    fn base(&self) -> &BaseCall {
        &self.base
    }
}

impl<Req, Resp> fmt::Debug for UnaryCall<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UnaryCall").field(&self.base).finish()
    }
}
