use super::{ClientCall, ResponseStream, StreamingRequestClientCall};
use crate::base_call::BaseCall;
use crate::connection::Connection;
use crate::delivery::ResponseObserver;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use streamcall_core::CallOptions;

/// Requests and responses both streamed, independently of each other.
pub struct BidirectionalStreamingCall<Req, Resp> {
    base: BaseCall,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> BidirectionalStreamingCall<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned + Send + 'static,
{
    pub fn new<F>(connection: &Connection, path: &str, options: CallOptions, handler: F) -> Self
    where
        F: FnMut(Resp) + Send + 'static,
    {
        Self {
            base: BaseCall::start(connection, path, options, ResponseObserver::handler(handler)),
            _marker: PhantomData,
        }
    }

    pub fn with_response_stream(
        connection: &Connection,
        path: &str,
        options: CallOptions,
    ) -> (Self, ResponseStream<Resp>) {
        let (handler, responses) = ResponseStream::channel();
        (Self::new(connection, path, options, handler), responses)
    }
}

impl<Req, Resp> ClientCall for BidirectionalStreamingCall<Req, Resp> {
    fn base(&self) -> &BaseCall {
        &self.base
    }
}

impl<Req: Serialize, Resp> StreamingRequestClientCall<Req> for BidirectionalStreamingCall<Req, Resp> {}

impl<Req, Resp> fmt::Debug for BidirectionalStreamingCall<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BidirectionalStreamingCall").field(&self.base).finish()
    }
}
