#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamcall_client::{
    CallError, CallId, ClientConfig, ClientErrorDelegate, Connection, MemoryTransport, Metadata,
    Status,
};
use streamcall_core::{decode_message_frame, encode_message_frame, DEFAULT_MAX_MESSAGE_SIZE};
use streamcall_transport::{InboundFrame, OutboundFrame, StreamHandle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    pub text: String,
}

impl Echo {
    pub fn new(text: impl Into<String>) -> Self {
        Echo { text: text.into() }
    }
}

/// Records every failure the delegate sees.
#[derive(Default)]
pub struct RecordingDelegate {
    errors: Mutex<Vec<(CallId, CallError)>>,
}

impl RecordingDelegate {
    pub fn errors(&self) -> Vec<(CallId, CallError)> {
        self.errors.lock().unwrap().clone()
    }
}

impl ClientErrorDelegate for RecordingDelegate {
    fn did_catch_error(&self, call: CallId, error: &CallError) {
        self.errors.lock().unwrap().push((call, error.clone()));
    }
}

pub struct Harness {
    pub transport: MemoryTransport,
    pub connection: Connection,
    pub delegate: Arc<RecordingDelegate>,
}

pub fn harness() -> Harness {
    harness_with_config(ClientConfig::new("echo.test"))
}

pub fn harness_with_config(config: ClientConfig) -> Harness {
    streamcall_client::logging::init_test_logging();
    let transport = MemoryTransport::new();
    let connection = Connection::new(transport.clone(), config).unwrap();
    let delegate = Arc::new(RecordingDelegate::default());
    connection.set_error_delegate(delegate.clone());
    Harness {
        transport,
        connection,
        delegate,
    }
}

/// Answers the header with empty initial metadata, echoes every message and finishes
/// with OK plus an `x-served-by` trailer once the request stream ends.
pub fn install_echo(transport: &MemoryTransport) {
    transport.set_responder(|_, frame: &OutboundFrame| match frame {
        OutboundFrame::Head(_) => vec![InboundFrame::Headers(Metadata::new())],
        OutboundFrame::Message(bytes) => vec![InboundFrame::Message(bytes.clone())],
        OutboundFrame::End => vec![ok_status()],
    });
}

pub fn ok_status() -> InboundFrame {
    let mut trailers = Metadata::new();
    trailers.append("x-served-by", "memory").unwrap();
    InboundFrame::Status {
        status: Status::ok(),
        trailers,
    }
}

pub fn message(echo: &Echo) -> InboundFrame {
    InboundFrame::Message(encode_message_frame(echo).unwrap())
}

/// Messages written on `stream`, decoded, in wire order.
pub fn written_messages(transport: &MemoryTransport, stream: StreamHandle) -> Vec<Echo> {
    transport
        .frames_for(stream)
        .into_iter()
        .filter_map(|frame| match frame {
            OutboundFrame::Message(bytes) => {
                Some(decode_message_frame(&bytes, DEFAULT_MAX_MESSAGE_SIZE).unwrap())
            }
            _ => None,
        })
        .collect()
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// Let spawned tasks run until `condition` holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
}
