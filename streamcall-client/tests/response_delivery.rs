mod common;

use common::{eventually, harness, install_echo, message, ok_status, within, Echo};
use futures::{FutureExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamcall_client::{
    BidirectionalStreamingCall, CallError, CallOptions, CallState, ClientCall,
    ClientStreamingCall, Metadata, ServerStreamingCall, Status, StatusCode,
    StreamingRequestClientCall, UnaryCall,
};
use streamcall_core::encode_frame;
use streamcall_transport::{InboundFrame, OutboundFrame, StreamHandle};

const STREAM: StreamHandle = StreamHandle::new(1);

fn collecting_chat(
    h: &common::Harness,
) -> (BidirectionalStreamingCall<Echo, Echo>, Arc<Mutex<Vec<Echo>>>) {
    let received = Arc::new(Mutex::new(Vec::<Echo>::new()));
    let sink = received.clone();
    let call = BidirectionalStreamingCall::<Echo, Echo>::new(
        &h.connection,
        "/echo.Echo/Chat",
        CallOptions::new(),
        move |response: Echo| sink.lock().unwrap().push(response),
    );
    (call, received)
}

#[tokio::test]
async fn test_every_message_is_delivered_before_the_status() {
    let h = harness();
    let (call, received) = collecting_chat(&h);

    h.transport
        .deliver(STREAM, InboundFrame::Headers(Metadata::new()))
        .unwrap();
    for text in ["one", "two", "three"] {
        h.transport.deliver(STREAM, message(&Echo::new(text))).unwrap();
    }
    h.transport.deliver(STREAM, ok_status()).unwrap();

    let status = within(call.status()).await;
    assert!(status.is_ok());
    assert_eq!(
        *received.lock().unwrap(),
        vec![Echo::new("one"), Echo::new("two"), Echo::new("three")]
    );
    assert_eq!(call.state(), CallState::Closed);
}

#[tokio::test]
async fn test_status_resolves_before_trailing_metadata() {
    let h = harness();
    let (call, _) = collecting_chat(&h);
    h.transport
        .deliver(STREAM, InboundFrame::Headers(Metadata::new()))
        .unwrap();
    h.transport.deliver(STREAM, ok_status()).unwrap();

    let trailers = within(call.trailing_metadata()).await.unwrap();
    assert_eq!(trailers.get("x-served-by"), Some("memory"));
    // By the time trailers are visible, the status already is.
    assert!(call.status().now_or_never().is_some());
}

#[tokio::test]
async fn test_initial_metadata_resolves_from_headers() {
    let h = harness();
    let (call, _) = collecting_chat(&h);
    let mut headers = Metadata::new();
    headers.append("x-region", "eu").unwrap();
    h.transport
        .deliver(STREAM, InboundFrame::Headers(headers))
        .unwrap();

    let initial = within(call.initial_metadata()).await.unwrap();
    assert_eq!(initial.get("x-region"), Some("eu"));
    eventually(|| call.state() == CallState::HeaderSent).await;
}

#[tokio::test]
async fn test_status_without_headers_fails_initial_metadata() {
    let h = harness();
    let (call, received) = collecting_chat(&h);
    h.transport
        .deliver(
            STREAM,
            InboundFrame::Status {
                status: Status::new(StatusCode::NotFound, "no such chat"),
                trailers: Metadata::new(),
            },
        )
        .unwrap();

    let status = within(call.status()).await;
    assert_eq!(status.code, StatusCode::NotFound);
    assert_eq!(within(call.initial_metadata()).await.unwrap_err(), status);
    assert!(within(call.trailing_metadata()).await.unwrap().is_empty());
    assert!(received.lock().unwrap().is_empty());
    // A server status is not an infrastructure failure.
    assert!(h.delegate.errors().is_empty());
}

#[tokio::test]
async fn test_message_before_headers_is_a_protocol_violation() {
    let h = harness();
    let (call, received) = collecting_chat(&h);
    h.transport.deliver(STREAM, message(&Echo::new("early"))).unwrap();

    let status = within(call.status()).await;
    assert_eq!(status.code, StatusCode::Internal);
    assert!(received.lock().unwrap().is_empty());

    let errors = h.delegate.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].1, CallError::ProtocolViolation(_)));
}

#[tokio::test]
async fn test_second_headers_frame_is_a_protocol_violation() {
    let h = harness();
    let (call, _) = collecting_chat(&h);
    h.transport
        .deliver(STREAM, InboundFrame::Headers(Metadata::new()))
        .unwrap();
    h.transport
        .deliver(STREAM, InboundFrame::Headers(Metadata::new()))
        .unwrap();

    assert_eq!(within(call.status()).await.code, StatusCode::Internal);
    assert!(within(call.initial_metadata()).await.is_ok());
    assert!(within(call.trailing_metadata()).await.is_err());
}

#[tokio::test]
async fn test_undecodable_response_closes_with_internal() {
    let h = harness();
    let (call, received) = collecting_chat(&h);
    h.transport
        .deliver(STREAM, InboundFrame::Headers(Metadata::new()))
        .unwrap();
    h.transport
        .deliver(STREAM, InboundFrame::Message(encode_frame(b"not json", 64).unwrap()))
        .unwrap();

    assert_eq!(within(call.status()).await.code, StatusCode::Internal);
    assert!(received.lock().unwrap().is_empty());
    assert!(matches!(h.delegate.errors()[0].1, CallError::Codec(_)));
}

#[tokio::test]
async fn test_frames_after_status_are_ignored() {
    let h = harness();
    let (call, received) = collecting_chat(&h);
    h.transport
        .deliver(STREAM, InboundFrame::Headers(Metadata::new()))
        .unwrap();
    h.transport.deliver(STREAM, ok_status()).unwrap();
    assert!(within(call.status()).await.is_ok());

    let _ = h.transport.deliver(STREAM, message(&Echo::new("late")));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(received.lock().unwrap().is_empty());
    assert!(within(call.status()).await.is_ok());
}

#[tokio::test]
async fn test_unary_echo() {
    let h = harness();
    install_echo(&h.transport);

    let call: UnaryCall<Echo, Echo> = UnaryCall::new(
        &h.connection,
        "/echo.Echo/Get",
        &Echo::new("ping"),
        CallOptions::new().with_timeout(Duration::from_secs(30)),
    );

    assert_eq!(within(call.response()).await.unwrap(), Echo::new("ping"));
    assert!(within(call.status()).await.is_ok());

    let head = h.transport.stream_head(STREAM).unwrap();
    assert!(head.headers.get("grpc-timeout").is_some());
    let frames = h.transport.frames_for(STREAM);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2], OutboundFrame::End);
}

#[tokio::test]
async fn test_unary_failure_status_fails_the_response() {
    let h = harness();
    h.transport.set_responder(|_, frame: &OutboundFrame| match frame {
        OutboundFrame::End => vec![InboundFrame::Status {
            status: Status::new(StatusCode::PermissionDenied, "nope"),
            trailers: Metadata::new(),
        }],
        _ => Vec::new(),
    });

    let call: UnaryCall<Echo, Echo> =
        UnaryCall::new(&h.connection, "/echo.Echo/Get", &Echo::new("ping"), CallOptions::new());
    let err = within(call.response()).await.unwrap_err();
    assert_eq!(err.code, StatusCode::PermissionDenied);
    assert_eq!(err.message.as_deref(), Some("nope"));
}

#[tokio::test]
async fn test_unary_ok_without_response_is_internal() {
    let h = harness();
    h.transport.set_responder(|_, frame: &OutboundFrame| match frame {
        OutboundFrame::Head(_) => vec![InboundFrame::Headers(Metadata::new())],
        OutboundFrame::End => vec![ok_status()],
        OutboundFrame::Message(_) => Vec::new(),
    });

    let call: UnaryCall<Echo, Echo> =
        UnaryCall::new(&h.connection, "/echo.Echo/Get", &Echo::new("ping"), CallOptions::new());
    assert_eq!(within(call.response()).await.unwrap_err().code, StatusCode::Internal);
    assert!(within(call.status()).await.is_ok());
}

#[tokio::test]
async fn test_unary_second_response_is_a_protocol_violation() {
    let h = harness();
    h.transport.set_responder(|_, frame: &OutboundFrame| match frame {
        OutboundFrame::Head(_) => vec![InboundFrame::Headers(Metadata::new())],
        OutboundFrame::Message(bytes) => vec![
            InboundFrame::Message(bytes.clone()),
            InboundFrame::Message(bytes.clone()),
        ],
        OutboundFrame::End => vec![ok_status()],
    });

    let call: UnaryCall<Echo, Echo> =
        UnaryCall::new(&h.connection, "/echo.Echo/Get", &Echo::new("ping"), CallOptions::new());
    assert_eq!(within(call.status()).await.code, StatusCode::Internal);
    assert!(matches!(
        h.delegate.errors()[0].1,
        CallError::ProtocolViolation(_)
    ));
}

#[tokio::test]
async fn test_client_streaming_single_response() {
    let h = harness();
    h.transport.set_responder(|_, frame: &OutboundFrame| match frame {
        OutboundFrame::Head(_) => vec![InboundFrame::Headers(Metadata::new())],
        OutboundFrame::Message(_) => Vec::new(),
        OutboundFrame::End => vec![message(&Echo::new("summary")), ok_status()],
    });

    let call: ClientStreamingCall<Echo, Echo> =
        ClientStreamingCall::new(&h.connection, "/echo.Echo/Collect", CallOptions::new());
    within(call.send_messages(vec![Echo::new("a"), Echo::new("b")]))
        .await
        .unwrap();
    assert!(call.response().now_or_never().is_none());

    within(call.send_end()).await.unwrap();
    assert_eq!(within(call.response()).await.unwrap(), Echo::new("summary"));
    assert!(within(call.status()).await.is_ok());
}

#[tokio::test]
async fn test_server_streaming_response_stream() {
    let h = harness();
    h.transport.set_responder(|_, frame: &OutboundFrame| match frame {
        OutboundFrame::Head(_) => vec![InboundFrame::Headers(Metadata::new())],
        OutboundFrame::Message(_) => Vec::new(),
        OutboundFrame::End => vec![
            message(&Echo::new("1")),
            message(&Echo::new("2")),
            message(&Echo::new("3")),
            ok_status(),
        ],
    });

    let (call, responses) = ServerStreamingCall::<Echo, Echo>::with_response_stream(
        &h.connection,
        "/echo.Echo/Expand",
        &Echo::new("1 2 3"),
        CallOptions::new(),
    );

    let collected: Vec<Echo> = within(responses.collect()).await;
    assert_eq!(collected, vec![Echo::new("1"), Echo::new("2"), Echo::new("3")]);
    assert!(within(call.status()).await.is_ok());
}

#[tokio::test]
async fn test_bidirectional_echo_round_trip() {
    let h = harness();
    install_echo(&h.transport);
    let (call, mut responses) = BidirectionalStreamingCall::<Echo, Echo>::with_response_stream(
        &h.connection,
        "/echo.Echo/Chat",
        CallOptions::new(),
    );

    call.send_message(&Echo::new("first")).await.unwrap();
    assert_eq!(within(responses.next()).await, Some(Echo::new("first")));
    call.send_message(&Echo::new("second")).await.unwrap();
    assert_eq!(within(responses.next()).await, Some(Echo::new("second")));

    call.send_end().await.unwrap();
    assert_eq!(within(responses.next()).await, None);
    assert!(within(call.status()).await.is_ok());
}
