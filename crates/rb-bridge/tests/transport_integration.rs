//! Transport integration tests
//!
//! Runs the REQ side against an in-process REP socket.

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use rb_bridge::transport::{self, TransferOutcome};
use rb_protocol::{
    decode_request, encode_reply, Metadata, Reply, ReplyStatus, Request, RequestType,
};

use common::{free_port, mock_service, ok_service};

const TIMEOUT: Duration = Duration::from_secs(2);

fn transfer_metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("filename".to_string(), Value::from("render.png"));
    metadata.insert("render_type".to_string(), Value::from("standard"));
    metadata
}

#[tokio::test]
async fn test_ping_gets_reply() {
    let (address, mut requests) = ok_service().await;

    assert!(transport::ping(&address, TIMEOUT).await);

    let parts = requests.recv().await.unwrap();
    assert_eq!(parts.len(), 1);
    let request = decode_request(&parts).unwrap();
    assert_eq!(request.kind(), RequestType::Ping);
}

#[tokio::test]
async fn test_ping_ignores_reply_content() {
    // Any reply counts, even one that is not a status map
    let (address, _requests) = mock_service(Bytes::from_static(b"pong")).await;
    assert!(transport::ping(&address, TIMEOUT).await);
}

#[tokio::test]
async fn test_ping_unreachable_returns_false_within_timeout() {
    let address = format!("tcp://127.0.0.1:{}", free_port());
    let timeout = Duration::from_millis(500);

    let started = Instant::now();
    assert!(!transport::ping(&address, timeout).await);
    // Connect + send and receive are each bounded
    assert!(started.elapsed() < timeout * 2 + Duration::from_millis(500));
}

#[tokio::test]
async fn test_transfer_with_payload_is_two_parts() {
    let (address, mut requests) = ok_service().await;

    let delivered = transport::transfer(
        &address,
        transfer_metadata(),
        Some(Bytes::from_static(b"\x89PNG image bytes")),
        TIMEOUT,
    )
    .await;
    assert!(delivered);

    let parts = requests.recv().await.unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[1].as_ref(), b"\x89PNG image bytes");

    let request = decode_request(&parts).unwrap();
    assert_eq!(request.kind(), RequestType::RenderAndReturn);
    assert_eq!(request.metadata()["filename"], Value::from("render.png"));
    assert_eq!(request.metadata()["type"], Value::from("render_and_return"));
}

#[tokio::test]
async fn test_transfer_without_payload_is_one_part() {
    let (address, mut requests) = ok_service().await;

    assert!(transport::transfer(&address, transfer_metadata(), None, TIMEOUT).await);
    assert_eq!(requests.recv().await.unwrap().len(), 1);

    // An empty payload is not attached either
    assert!(transport::transfer(&address, transfer_metadata(), Some(Bytes::new()), TIMEOUT).await);
    assert_eq!(requests.recv().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transfer_error_status_is_failure() {
    let reply = encode_reply(&Reply::error("no workflow loaded")).unwrap();
    let (address, _requests) = mock_service(reply).await;

    assert!(!transport::transfer(&address, transfer_metadata(), None, TIMEOUT).await);

    let outcome = transport::send(
        &address,
        Request::new(RequestType::RenderAndReturn, transfer_metadata(), None),
        TIMEOUT,
    )
    .await;
    assert_eq!(
        outcome,
        TransferOutcome::Rejected {
            status: ReplyStatus::Other("error".to_string()),
            detail: Some("no workflow loaded".to_string()),
        }
    );
}

#[tokio::test]
async fn test_transfer_missing_status_is_failure() {
    #[derive(Serialize)]
    struct Ack {
        received: bool,
    }
    let reply = Bytes::from(rmp_serde::to_vec_named(&Ack { received: true }).unwrap());
    let (address, _requests) = mock_service(reply).await;

    let outcome = transport::send(
        &address,
        Request::new(RequestType::RenderAndReturn, transfer_metadata(), None),
        TIMEOUT,
    )
    .await;
    assert!(matches!(
        outcome,
        TransferOutcome::Rejected {
            status: ReplyStatus::Missing,
            ..
        }
    ));
}

#[tokio::test]
async fn test_transfer_garbage_reply_is_failure() {
    let (address, _requests) = mock_service(Bytes::from_static(b"\xc1")).await;

    let outcome = transport::send(
        &address,
        Request::new(RequestType::RenderAndReturn, transfer_metadata(), None),
        TIMEOUT,
    )
    .await;
    assert!(matches!(outcome, TransferOutcome::Malformed(_)));
}

#[tokio::test]
async fn test_transfer_unreachable_is_failure() {
    let address = format!("127.0.0.1:{}", free_port());
    assert!(
        !transport::transfer(
            &address,
            transfer_metadata(),
            None,
            Duration::from_millis(300)
        )
        .await
    );
}

#[tokio::test]
async fn test_request_returns_decoded_reply() {
    let (address, _requests) = ok_service().await;
    let reply = transport::request(&address, Request::ping(), TIMEOUT)
        .await
        .unwrap();
    assert!(reply.is_ok());
}
