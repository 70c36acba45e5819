use super::{ClientCall, ResponseStream};
use crate::base_call::BaseCall;
use crate::connection::Connection;
use crate::delivery::ResponseObserver;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use streamcall_core::CallOptions;

/// One request answered by a stream of responses.
pub struct ServerStreamingCall<Req, Resp> {
    base: BaseCall,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> ServerStreamingCall<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned + Send + 'static,
{
    /// Start the call, send `request` and half-close. `handler` sees every response
    /// in arrival order, all before the status resolves.
    pub fn new<F>(
        connection: &Connection,
        path: &str,
        request: &Req,
        options: CallOptions,
        handler: F,
    ) -> Self
    where
        F: FnMut(Resp) + Send + 'static,
    {
        let base = BaseCall::start(connection, path, options, ResponseObserver::handler(handler));
        base.send_message(request, None);
        base.send_end(None);
        Self {
            base,
            _marker: PhantomData,
        }
    }

    /// Like [`ServerStreamingCall::new`], with responses pulled from a stream.
    pub fn with_response_stream(
        connection: &Connection,
        path: &str,
        request: &Req,
        options: CallOptions,
    ) -> (Self, ResponseStream<Resp>) {
        let (handler, responses) = ResponseStream::channel();
        (Self::new(connection, path, request, options, handler), responses)
    }
}

impl<Req, Resp> ClientCall for ServerStreamingCall<Req, Resp> {
    fn base(&self) -> &BaseCall {
        &self.base
    }
}

impl<Req, Resp> fmt::Debug for ServerStreamingCall<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServerStreamingCall").field(&self.base).finish()
    }
}
