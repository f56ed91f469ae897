//! Shared fixtures for rb-bridge integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use zeromq::{RepSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use rb_bridge::tunnel::{ForwardDirection, Forwarder};
use rb_core::TunnelError;
use rb_protocol::{encode_reply, Reply};

/// A port nothing is listening on
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("No local addr").port()
}

/// In-process REP socket standing in for the image service.
///
/// Every request's parts are forwarded to the returned receiver and
/// answered with `reply`.
pub async fn mock_service(reply: Bytes) -> (String, mpsc::UnboundedReceiver<Vec<Bytes>>) {
    let mut socket = RepSocket::new();
    let endpoint = socket
        .bind("tcp://127.0.0.1:0")
        .await
        .expect("Failed to bind mock service");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok(message) = socket.recv().await {
            let _ = tx.send(message.into_vec());
            if socket.send(ZmqMessage::from(reply.clone())).await.is_err() {
                break;
            }
        }
    });

    (endpoint.to_string(), rx)
}

/// Mock service answering `{"status": "ok"}`
pub async fn ok_service() -> (String, mpsc::UnboundedReceiver<Vec<Bytes>>) {
    mock_service(encode_reply(&Reply::ok()).expect("Failed to encode reply")).await
}

/// What a scripted forwarder does when started
#[derive(Debug, Clone)]
pub enum Script {
    /// Start succeeds and stays up
    Healthy,
    /// Start fails with this error
    FailStart(TunnelError),
    /// Start succeeds, then reports a failure after the delay
    FailAfter(Duration, String),
    /// Start never completes
    Hang,
}

/// Forwarder that follows a script and counts calls
pub struct ScriptedForwarder {
    direction: ForwardDirection,
    script: Script,
    active: Arc<AtomicBool>,
    failure: Arc<parking_lot::Mutex<Option<String>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl ScriptedForwarder {
    pub fn new(direction: ForwardDirection, script: Script) -> Arc<Self> {
        Arc::new(Self {
            direction,
            script,
            active: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(parking_lot::Mutex::new(None)),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Forwarder for ScriptedForwarder {
    fn direction(&self) -> ForwardDirection {
        self.direction
    }

    async fn start(&self) -> Result<(), TunnelError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Healthy => {
                self.active.store(true, Ordering::SeqCst);
                Ok(())
            }
            Script::FailStart(error) => Err(error.clone()),
            Script::FailAfter(delay, reason) => {
                self.active.store(true, Ordering::SeqCst);
                let active = Arc::clone(&self.active);
                let failure = Arc::clone(&self.failure);
                let (delay, reason) = (*delay, reason.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    active.store(false, Ordering::SeqCst);
                    *failure.lock() = Some(reason);
                });
                Ok(())
            }
            Script::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }
}
