//! Callback receiver integration tests
//!
//! Drives a real listener over HTTP.

mod common;

use std::path::{Path, PathBuf};

use rb_bridge::receiver::{CallbackReceiver, ReceiverState, IMAGE_NAME_HEADER};
use rb_bridge::tasks::{task_queue, HostError, ImageHost, TaskQueue, TickOutcome};
use rb_core::ReceiverError;

use common::free_port;

/// Host that accepts every image and remembers what it saw
#[derive(Default)]
struct AcceptAll {
    loaded: Vec<(String, PathBuf, Vec<u8>)>,
}

impl ImageHost for AcceptAll {
    fn reload_image(&mut self, name: &str, path: &Path) -> Result<(), HostError> {
        let bytes = std::fs::read(path).map_err(|e| HostError::Load(e.to_string()))?;
        self.loaded
            .push((name.to_string(), path.to_path_buf(), bytes));
        Ok(())
    }
}

async fn started(
    default_target: Option<&str>,
    temp_dir: &Path,
) -> (CallbackReceiver, TaskQueue, String) {
    let (tasks, queue) = task_queue();
    let mut receiver = CallbackReceiver::new(tasks).with_temp_dir(temp_dir);
    let port = free_port();
    receiver
        .start(port, default_target.map(str::to_string))
        .await
        .expect("Failed to start receiver");
    (receiver, queue, format!("http://127.0.0.1:{}/", port))
}

#[tokio::test]
async fn test_raw_body_round_trip_to_host() {
    let dir = tempfile::tempdir().unwrap();
    let (mut receiver, mut queue, url) = started(Some("Result"), dir.path()).await;
    assert_eq!(receiver.state(), ReceiverState::Listening);

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "image/png")
        .body(b"\x89PNG\r\n\x1a\n".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    let mut host = AcceptAll::default();
    assert!(matches!(queue.tick(&mut host), TickOutcome::Applied(_)));

    let (name, path, bytes) = &host.loaded[0];
    assert_eq!(name, "Result");
    assert_eq!(bytes, b"\x89PNG\r\n\x1a\n");
    assert_eq!(path.extension().unwrap(), "png");
    // Receiver-created file is gone once applied
    assert!(!path.exists());

    receiver.stop().await;
    assert_eq!(receiver.state(), ReceiverState::Stopped);
}

#[tokio::test]
async fn test_header_overrides_default_target() {
    let dir = tempfile::tempdir().unwrap();
    let (mut receiver, mut queue, url) = started(Some("Result"), dir.path()).await;

    let response = reqwest::Client::new()
        .post(&url)
        .header(IMAGE_NAME_HEADER, "Render Result")
        .json(&serde_json::json!({ "image_path": "/tmp/x.png" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let mut host = RecordOnly::default();
    queue.tick(&mut host);
    assert_eq!(
        host.seen,
        vec![("Render Result".to_string(), PathBuf::from("/tmp/x.png"))]
    );

    receiver.stop().await;
}

#[tokio::test]
async fn test_missing_target_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut receiver, queue, url) = started(None, dir.path()).await;

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "image/png")
        .body(vec![1u8, 2, 3])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(queue.is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    receiver.stop().await;
}

#[tokio::test]
async fn test_bad_request_keeps_listener_alive() {
    let dir = tempfile::tempdir().unwrap();
    let (mut receiver, queue, url) = started(Some("Result"), dir.path()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let response = client
        .post(&url)
        .header("content-type", "application/json")
        .body(r#"{"image_path": "/tmp/ok.png"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(queue.pending(), 1);

    receiver.stop().await;
}

#[tokio::test]
async fn test_restart_moves_to_new_port() {
    let dir = tempfile::tempdir().unwrap();
    let (mut receiver, _queue, first_url) = started(Some("Result"), dir.path()).await;
    let first = receiver.local_addr().unwrap();

    let second_port = free_port();
    receiver
        .start(second_port, Some("Result".to_string()))
        .await
        .unwrap();
    assert_eq!(receiver.local_addr().unwrap().port(), second_port);
    assert_ne!(first.port(), second_port);

    // Old listener is gone
    let result = reqwest::Client::new()
        .post(&first_url)
        .header("content-type", "image/png")
        .body(vec![0u8])
        .send()
        .await;
    assert!(result.is_err());

    receiver.stop().await;
}

#[tokio::test]
async fn test_port_in_use_is_reported() {
    let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let (tasks, _queue) = task_queue();
    let mut receiver = CallbackReceiver::new(tasks);
    let err = receiver.start(port, None).await.unwrap_err();
    assert!(matches!(err, ReceiverError::Bind { port: p, .. } if p == port));
    assert_eq!(receiver.state(), ReceiverState::Stopped);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (tasks, _queue) = task_queue();
    let mut receiver = CallbackReceiver::new(tasks);
    receiver.stop().await;
    receiver.stop().await;
    assert_eq!(receiver.state(), ReceiverState::Stopped);
}

#[derive(Default)]
struct RecordOnly {
    seen: Vec<(String, PathBuf)>,
}

impl ImageHost for RecordOnly {
    fn reload_image(&mut self, name: &str, path: &Path) -> Result<(), HostError> {
        self.seen.push((name.to_string(), path.to_path_buf()));
        Ok(())
    }
}
