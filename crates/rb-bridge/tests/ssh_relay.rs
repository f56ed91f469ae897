//! SSH forwarder tests against an in-process relay
//!
//! The relay is a russh server that accepts one user, serves
//! `direct-tcpip` channels and honours `tcpip-forward`. It sits behind a
//! TCP pass-through the tests can cut to simulate the relay going away.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::server::{self, Auth, Msg, Session};
use russh::Channel;
use russh_keys::key::KeyPair;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rb_bridge::tunnel::{TunnelManager, TunnelSettings, TunnelStatus};
use rb_core::BridgeConfig;

use common::free_port;

const USER: &str = "render";
const PASSWORD: &str = "relay-secret";

/// What the relay saw, for assertions
#[derive(Default)]
struct RelayLog {
    /// `host:port` of every direct-tcpip request
    direct_targets: Vec<String>,
}

/// Per-connection relay handler
struct RelayHandler {
    /// Where direct-tcpip channels actually go
    service: SocketAddr,
    log: Arc<Mutex<RelayLog>>,
    /// Relay-side listener ports opened for tcpip-forward
    forwards: mpsc::UnboundedSender<u16>,
}

#[async_trait]
impl server::Handler for RelayHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            return Ok(Auth::Accept);
        }
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.log
            .lock()
            .direct_targets
            .push(format!("{}:{}", host_to_connect, port_to_connect));

        let service = self.service;
        tokio::spawn(async move {
            if let Ok(mut stream) = TcpStream::connect(service).await {
                let mut channel = channel.into_stream();
                let _ = tokio::io::copy_bidirectional(&mut channel, &mut stream).await;
            }
        });
        Ok(true)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        // The relay shares a host with the test, so the requested port is
        // taken by the local receiver; listen on a fresh one instead.
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let bound = listener.local_addr()?.port();
        let _ = self.forwards.send(bound);

        let handle = session.handle();
        let connected_address = address.to_string();
        let connected_port = *port;
        tokio::spawn(async move {
            while let Ok((mut stream, peer)) = listener.accept().await {
                let channel = match handle
                    .channel_open_forwarded_tcpip(
                        connected_address.clone(),
                        connected_port,
                        peer.ip().to_string(),
                        u32::from(peer.port()),
                    )
                    .await
                {
                    Ok(channel) => channel,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut channel = channel.into_stream();
                    let _ = tokio::io::copy_bidirectional(&mut stream, &mut channel).await;
                });
            }
        });
        Ok(true)
    }
}

/// A running relay reachable through a cuttable pass-through
struct Relay {
    /// Port clients connect to
    port: u16,
    log: Arc<Mutex<RelayLog>>,
    forwards: mpsc::UnboundedReceiver<u16>,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Relay {
    async fn start(service: SocketAddr) -> Self {
        let mut config = server::Config::default();
        config.keys.push(KeyPair::generate_ed25519().expect("Failed to generate host key"));
        config.auth_rejection_time = Duration::from_millis(10);
        config.auth_rejection_time_initial = Some(Duration::from_secs(0));
        let config = Arc::new(config);

        let log = Arc::new(Mutex::new(RelayLog::default()));
        let (forwards_tx, forwards) = mpsc::unbounded_channel();

        let ssh_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ssh_addr = ssh_listener.local_addr().unwrap();
        {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                while let Ok((socket, _)) = ssh_listener.accept().await {
                    let handler = RelayHandler {
                        service,
                        log: Arc::clone(&log),
                        forwards: forwards_tx.clone(),
                    };
                    let config = Arc::clone(&config);
                    tokio::spawn(async move {
                        let _ = server::run_stream(config, socket, handler).await;
                    });
                }
            });
        }

        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = front.local_addr().unwrap().port();
        let links = Arc::new(Mutex::new(Vec::new()));
        {
            let links = Arc::clone(&links);
            tokio::spawn(async move {
                while let Ok((mut client, _)) = front.accept().await {
                    let link = tokio::spawn(async move {
                        if let Ok(mut upstream) = TcpStream::connect(ssh_addr).await {
                            let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                        }
                    });
                    links.lock().push(link);
                }
            });
        }

        Self {
            port,
            log,
            forwards,
            links,
        }
    }

    /// Drop every SSH connection at the TCP level
    fn cut(&self) {
        for link in self.links.lock().drain(..) {
            link.abort();
        }
    }
}

/// Echo server standing in for the image service
async fn echo_service() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

fn tunneled_config(relay_port: u16, service_port: u16, callback_port: u16) -> BridgeConfig {
    let mut config = BridgeConfig {
        service_address: format!("tcp://render-box.internal:{}", service_port),
        receiver_port: callback_port,
        ..Default::default()
    };
    config.ssh.enabled = true;
    config.ssh.host = "127.0.0.1".to_string();
    config.ssh.port = relay_port.to_string();
    config.ssh.username = USER.to_string();
    config.ssh.password = Some(PASSWORD.to_string());
    config
}

async fn wait_for_status<F>(manager: &TunnelManager, mut done: F, bound: Duration) -> TunnelStatus
where
    F: FnMut(&TunnelStatus) -> bool,
{
    let deadline = Instant::now() + bound;
    loop {
        let status = manager.status();
        if done(&status) || Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn active_manager(config: &BridgeConfig) -> TunnelManager {
    let manager = TunnelManager::new(TunnelSettings::from_config(config).unwrap());
    manager.start();
    let status = wait_for_status(&manager, |s| *s != TunnelStatus::Inactive, Duration::from_secs(10)).await;
    assert_eq!(status, TunnelStatus::Active);
    manager
}

#[tokio::test]
async fn test_outbound_reaches_remote_service() {
    let service = echo_service().await;
    let relay = Relay::start(service).await;
    let service_port = free_port();
    let config = tunneled_config(relay.port, service_port, free_port());

    let manager = active_manager(&config).await;

    let mut stream = TcpStream::connect(("127.0.0.1", service_port)).await.unwrap();
    stream.write_all(b"render bytes").await.unwrap();
    let mut echoed = [0u8; 12];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut echoed))
        .await
        .expect("No echo through the tunnel")
        .unwrap();
    assert_eq!(&echoed, b"render bytes");

    assert_eq!(
        relay.log.lock().direct_targets,
        vec![format!("render-box.internal:{}", service_port)]
    );

    manager.stop().await;
    assert_eq!(manager.status(), TunnelStatus::Inactive);
}

#[tokio::test]
async fn test_inbound_reaches_callback_port() {
    let service = echo_service().await;
    let mut relay = Relay::start(service).await;

    let receiver = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let callback_port = receiver.local_addr().unwrap().port();
    let config = tunneled_config(relay.port, free_port(), callback_port);

    let manager = active_manager(&config).await;

    let relay_side = tokio::time::timeout(Duration::from_secs(5), relay.forwards.recv())
        .await
        .expect("Relay never opened a forward")
        .unwrap();

    let mut remote = TcpStream::connect(("127.0.0.1", relay_side)).await.unwrap();
    remote.write_all(b"POST / result").await.unwrap();

    let (mut local, _) = tokio::time::timeout(Duration::from_secs(5), receiver.accept())
        .await
        .expect("Callback never reached the local port")
        .unwrap();
    let mut received = [0u8; 13];
    tokio::time::timeout(Duration::from_secs(5), local.read_exact(&mut received))
        .await
        .expect("Callback bytes never arrived")
        .unwrap();
    assert_eq!(&received, b"POST / result");

    manager.stop().await;
}

#[tokio::test]
async fn test_lost_relay_is_sticky_error() {
    let service = echo_service().await;
    let relay = Relay::start(service).await;
    let config = tunneled_config(relay.port, free_port(), free_port());

    let manager = active_manager(&config).await;

    relay.cut();

    let status = wait_for_status(
        &manager,
        |s| matches!(s, TunnelStatus::Error(_)),
        Duration::from_secs(5),
    )
    .await;
    let TunnelStatus::Error(message) = status else {
        panic!("expected an error after losing the relay");
    };
    assert!(message.contains("SSH session closed"), "unexpected error: {}", message);
    assert!(!manager.is_running());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(matches!(manager.status(), TunnelStatus::Error(_)));

    manager.stop().await;
    assert!(matches!(manager.status(), TunnelStatus::Error(_)));
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let service = echo_service().await;
    let relay = Relay::start(service).await;
    let mut config = tunneled_config(relay.port, free_port(), free_port());
    config.ssh.password = Some("wrong".to_string());

    let manager = TunnelManager::new(TunnelSettings::from_config(&config).unwrap());
    manager.start();
    let status = wait_for_status(
        &manager,
        |s| matches!(s, TunnelStatus::Error(_)),
        Duration::from_secs(10),
    )
    .await;
    let TunnelStatus::Error(message) = status else {
        panic!("expected an authentication error");
    };
    assert!(message.contains("authentication rejected"), "unexpected error: {}", message);

    manager.stop().await;
}
