mod common;

use common::{eventually, harness, harness_with_config, within, Echo};
use std::time::{Duration, Instant};
use streamcall_client::{
    BidirectionalStreamingCall, CallError, CallOptions, CallState, ClientCall, ClientConfig,
    Metadata, StatusCode, StreamingRequestClientCall, TransportError, UnaryCall,
};
use streamcall_transport::{CloseMode, InboundFrame, StreamHandle};

type Chat = BidirectionalStreamingCall<Echo, Echo>;

const STREAM: StreamHandle = StreamHandle::new(1);

#[tokio::test]
async fn test_cancel_fails_queued_sends_and_writes_nothing_more() {
    let h = harness();
    h.transport.hold_writes();
    let call = Chat::new(&h.connection, "/echo.Echo/Chat", CallOptions::new(), |_| {});

    let first = call.send_message(&Echo::new("a"));
    let second = call.send_message(&Echo::new("b"));
    call.cancel();

    assert!(matches!(within(first).await, Err(CallError::Cancelled)));
    assert!(matches!(within(second).await, Err(CallError::Cancelled)));
    let status = within(call.status()).await;
    assert_eq!(status.code, StatusCode::Cancelled);
    assert_eq!(call.state(), CallState::Closed);

    h.transport.release_writes();
    eventually(|| h.transport.close_mode(STREAM) == Some(CloseMode::Forced)).await;
    assert!(h.transport.frames_for(STREAM).is_empty());
    assert!(matches!(
        call.send_message(&Echo::new("c")).await,
        Err(CallError::Cancelled)
    ));
    // Cancellation is not an infrastructure failure.
    assert!(h.delegate.errors().is_empty());
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let h = harness();
    let call = Chat::new(&h.connection, "/echo.Echo/Chat", CallOptions::new(), |_| {});
    call.cancel();
    call.cancel();
    assert_eq!(within(call.status()).await.code, StatusCode::Cancelled);
    assert!(within(call.initial_metadata()).await.is_err());
    assert!(within(call.trailing_metadata()).await.is_err());
    assert_eq!(h.connection.active_calls(), 0);
}

#[tokio::test]
async fn test_cancel_after_status_changes_nothing() {
    let h = harness();
    let call = Chat::new(&h.connection, "/echo.Echo/Chat", CallOptions::new(), |_| {});
    h.transport
        .deliver(STREAM, InboundFrame::Headers(Metadata::new()))
        .unwrap();
    h.transport.deliver(STREAM, common::ok_status()).unwrap();
    assert!(within(call.status()).await.is_ok());

    call.cancel();
    assert!(within(call.status()).await.is_ok());
}

#[tokio::test]
async fn test_expired_deadline_never_opens_a_stream() {
    let h = harness();
    let call: UnaryCall<Echo, Echo> = UnaryCall::new(
        &h.connection,
        "/echo.Echo/Get",
        &Echo::new("ping"),
        CallOptions::new().with_deadline(Instant::now()),
    );

    assert_eq!(within(call.status()).await.code, StatusCode::DeadlineExceeded);
    assert_eq!(
        within(call.response()).await.unwrap_err().code,
        StatusCode::DeadlineExceeded
    );
    assert!(h.transport.stream_handles().is_empty());
    assert_eq!(h.transport.write_attempts(), 0);
    assert!(h.delegate.errors().is_empty());
}

#[tokio::test]
async fn test_deadline_expires_mid_call() {
    let h = harness();
    let call = Chat::new(
        &h.connection,
        "/echo.Echo/Chat",
        CallOptions::new().with_timeout(Duration::from_millis(50)),
        |_| {},
    );
    assert!(h.transport.stream_head(STREAM).unwrap().headers.get("grpc-timeout").is_some());
    call.send_message(&Echo::new("slow")).await.unwrap();

    let status = within(call.status()).await;
    assert_eq!(status.code, StatusCode::DeadlineExceeded);

    // A status arriving after the deadline is suppressed.
    let _ = h.transport.deliver(STREAM, common::ok_status());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(within(call.status()).await.code, StatusCode::DeadlineExceeded);
    assert!(matches!(
        call.send_message(&Echo::new("late")).await,
        Err(CallError::DeadlineExceeded)
    ));
}

#[tokio::test]
async fn test_connection_default_timeout() {
    let h = harness_with_config(
        ClientConfig::new("echo.test").with_default_timeout(Duration::from_millis(30)),
    );
    let call = Chat::new(&h.connection, "/echo.Echo/Chat", CallOptions::new(), |_| {});
    assert_eq!(within(call.status()).await.code, StatusCode::DeadlineExceeded);
}

#[tokio::test]
async fn test_shutdown_cancels_live_calls_and_refuses_new_ones() {
    let h = harness();
    let live = Chat::new(&h.connection, "/echo.Echo/Chat", CallOptions::new(), |_| {});
    assert_eq!(h.connection.active_calls(), 1);

    assert_eq!(h.connection.shutdown(), 1);
    assert_eq!(within(live.status()).await.code, StatusCode::Cancelled);

    let late = Chat::new(&h.connection, "/echo.Echo/Chat", CallOptions::new(), |_| {});
    assert_eq!(within(late.status()).await.code, StatusCode::Unavailable);
    assert_eq!(h.transport.stream_handles(), vec![STREAM]);
    assert_eq!(h.connection.active_calls(), 0);
}

#[tokio::test]
async fn test_refused_stream_closes_with_unavailable() {
    let h = harness();
    h.transport
        .refuse_next_open(TransportError::StreamRefused("too many streams".into()));
    let call = Chat::new(&h.connection, "/echo.Echo/Chat", CallOptions::new(), |_| {});

    let status = within(call.status()).await;
    assert_eq!(status.code, StatusCode::Unavailable);
    assert!(matches!(
        call.send_message(&Echo::new("x")).await,
        Err(CallError::Transport(TransportError::StreamRefused(_)))
    ));

    let errors = h.delegate.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, call.call_id());
}

#[tokio::test]
async fn test_reserved_custom_header_fails_the_call() {
    let h = harness();
    let mut metadata = Metadata::new();
    metadata.append("grpc-status", "0").unwrap();
    let call = Chat::new(
        &h.connection,
        "/echo.Echo/Chat",
        CallOptions::new().with_metadata(metadata),
        |_| {},
    );

    assert_eq!(within(call.status()).await.code, StatusCode::Internal);
    assert!(h.transport.stream_handles().is_empty());
    assert!(matches!(
        h.delegate.errors()[0].1,
        CallError::InvalidHeader(_)
    ));
}

#[tokio::test]
async fn test_transport_failure_mid_stream() {
    let h = harness();
    let call = Chat::new(&h.connection, "/echo.Echo/Chat", CallOptions::new(), |_| {});
    h.transport
        .deliver(STREAM, InboundFrame::Failed(TransportError::ConnectionClosed))
        .unwrap();

    assert_eq!(within(call.status()).await.code, StatusCode::Unavailable);
    assert_eq!(h.delegate.errors().len(), 1);
}
