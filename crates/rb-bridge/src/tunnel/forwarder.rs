//! One direction of the tunnel over its own SSH session

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::PublicKey;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rb_core::{Endpoint, TunnelError};

use super::settings::{SshAuth, TunnelSettings};

/// How often a running forwarder checks that its SSH session is alive
const SESSION_WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Which way a forwarder carries connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDirection {
    /// Local listener to the remote service
    Outbound,
    /// Relay listener back to the local callback receiver
    Inbound,
}

impl fmt::Display for ForwardDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardDirection::Outbound => write!(f, "outbound"),
            ForwardDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// One supervised forwarding sub-session.
///
/// Methods take `&self` so the supervisor task and status queries can
/// share the forwarder.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Which direction this forwarder carries
    fn direction(&self) -> ForwardDirection;

    /// Connect and begin forwarding
    async fn start(&self) -> Result<(), TunnelError>;

    /// Whether forwarding is currently up
    fn is_active(&self) -> bool;

    /// A failure that happened after a successful start
    fn failure(&self) -> Option<String>;

    /// Stop forwarding and close the SSH session. Safe to call repeatedly.
    async fn stop(&self);
}

/// Live pieces of a started [`SshForwarder`]
struct ActiveForward {
    session: Arc<Handle<RelayClient>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// State shared with the forwarder's background tasks
#[derive(Default)]
struct ForwardState {
    active: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl ForwardState {
    fn fail(&self, message: String) {
        self.active.store(false, Ordering::SeqCst);
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(message);
        }
    }
}

/// Forwarder backed by a russh client session
pub struct SshForwarder {
    direction: ForwardDirection,
    settings: Arc<TunnelSettings>,
    state: Arc<ForwardState>,
    running: tokio::sync::Mutex<Option<ActiveForward>>,
}

impl SshForwarder {
    /// Create a stopped forwarder
    pub fn new(direction: ForwardDirection, settings: Arc<TunnelSettings>) -> Self {
        Self {
            direction,
            settings,
            state: Arc::new(ForwardState::default()),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Open and authenticate an SSH session to the relay
    async fn connect(&self) -> Result<Handle<RelayClient>, TunnelError> {
        let settings = &self.settings;
        let address = settings.ssh.to_string();

        let ssh_config = Arc::new(Config {
            keepalive_interval: Some(settings.keepalive),
            ..Default::default()
        });

        let rejected = Arc::new(Mutex::new(None));
        let handler = RelayClient {
            direction: self.direction,
            expected_fingerprint: settings.host_key_fingerprint.clone(),
            rejected: Arc::clone(&rejected),
            callback_port: settings.callback_port,
        };

        tracing::debug!("[{}] Connecting to {}", self.direction, address);
        let mut session = tokio::time::timeout(
            settings.connect_timeout,
            client::connect(
                ssh_config,
                (settings.ssh.host.as_str(), settings.ssh.port),
                handler,
            ),
        )
        .await
        .map_err(|_| TunnelError::Connect {
            address: address.clone(),
            message: format!("timed out after {:?}", settings.connect_timeout),
        })?
        .map_err(|e| {
            if let Some((expected, actual)) = rejected.lock().take() {
                return TunnelError::HostKeyRejected { expected, actual };
            }
            TunnelError::Connect {
                address: address.clone(),
                message: e.to_string(),
            }
        })?;

        tracing::debug!(
            "[{}] Authenticating as user '{}'",
            self.direction,
            settings.username
        );
        let authenticated = match &settings.auth {
            SshAuth::Password(password) => session
                .authenticate_password(settings.username.as_str(), password.as_str())
                .await
                .map_err(|e| TunnelError::Ssh(format!("Authentication error: {}", e)))?,
            SshAuth::Key { path, passphrase } => {
                let key = russh_keys::load_secret_key(path, passphrase.as_deref()).map_err(
                    |e| TunnelError::KeyLoad {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    },
                )?;
                session
                    .authenticate_publickey(settings.username.as_str(), Arc::new(key))
                    .await
                    .map_err(|e| TunnelError::Ssh(format!("Authentication error: {}", e)))?
            }
        };

        if !authenticated {
            return Err(TunnelError::AuthRejected(settings.username.clone()));
        }

        Ok(session)
    }

    /// Bind the local listener and relay each connection to the service
    async fn start_outbound(
        &self,
        session: Arc<Handle<RelayClient>>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, TunnelError> {
        let port = self.settings.local_service_port;
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .map_err(|e| TunnelError::Bind {
                port,
                message: e.to_string(),
            })?;

        tracing::info!(
            "[outbound] 127.0.0.1:{} -> {} via {}",
            port,
            self.settings.remote_service,
            self.settings.ssh
        );

        let remote = self.settings.remote_service.clone();
        Ok(tokio::spawn(accept_loop(listener, session, remote, cancel)))
    }

    /// Ask the relay to listen on the callback port and forward it back
    async fn start_inbound(&self, session: &mut Handle<RelayClient>) -> Result<(), TunnelError> {
        let port = self.settings.callback_port;
        let bound = session
            .tcpip_forward("127.0.0.1", u32::from(port))
            .await
            .map_err(|e| match e {
                russh::Error::RequestDenied => TunnelError::ForwardRejected(port),
                other => TunnelError::Ssh(format!("Remote forward request failed: {}", other)),
            })?;

        tracing::info!(
            "[inbound] {}:127.0.0.1:{} -> 127.0.0.1:{}",
            self.settings.ssh,
            bound,
            port
        );
        Ok(())
    }
}

#[async_trait]
impl Forwarder for SshForwarder {
    fn direction(&self) -> ForwardDirection {
        self.direction
    }

    async fn start(&self) -> Result<(), TunnelError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        *self.state.failure.lock() = None;

        let mut session = self.connect().await?;
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let session = match self.direction {
            ForwardDirection::Outbound => {
                let session = Arc::new(session);
                tasks.push(
                    self.start_outbound(Arc::clone(&session), cancel.clone())
                        .await?,
                );
                session
            }
            ForwardDirection::Inbound => {
                self.start_inbound(&mut session).await?;
                Arc::new(session)
            }
        };

        tasks.push(tokio::spawn(watch_session(
            self.direction,
            Arc::clone(&session),
            Arc::clone(&self.state),
            cancel.clone(),
        )));

        self.state.active.store(true, Ordering::SeqCst);
        *running = Some(ActiveForward {
            session,
            cancel,
            tasks,
        });
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<String> {
        self.state.failure.lock().clone()
    }

    async fn stop(&self) {
        let Some(active) = self.running.lock().await.take() else {
            return;
        };

        self.state.active.store(false, Ordering::SeqCst);
        active.cancel.cancel();
        for task in active.tasks {
            task.abort();
        }

        if let Err(e) = active
            .session
            .disconnect(Disconnect::ByApplication, "tunnel stopped", "en")
            .await
        {
            tracing::debug!("[{}] Disconnect failed: {}", self.direction, e);
        }
        tracing::info!("[{}] Forwarder stopped", self.direction);
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<Handle<RelayClient>>,
    remote: Endpoint,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let session = Arc::clone(&session);
                        let remote = remote.clone();
                        tokio::spawn(async move {
                            if let Err(e) = relay_outbound(stream, peer, &session, &remote).await {
                                tracing::warn!("[outbound] Connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("[outbound] Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

async fn relay_outbound(
    mut stream: TcpStream,
    peer: SocketAddr,
    session: &Handle<RelayClient>,
    remote: &Endpoint,
) -> anyhow::Result<()> {
    let channel = session
        .channel_open_direct_tcpip(
            remote.host.as_str(),
            u32::from(remote.port),
            peer.ip().to_string(),
            u32::from(peer.port()),
        )
        .await?;

    let mut remote_stream = channel.into_stream();
    let (sent, received) = tokio::io::copy_bidirectional(&mut stream, &mut remote_stream).await?;
    tracing::debug!(
        "[outbound] {} closed ({} bytes out, {} bytes in)",
        peer,
        sent,
        received
    );
    Ok(())
}

async fn relay_inbound(channel: Channel<Msg>, callback_port: u16) -> anyhow::Result<()> {
    let mut local = TcpStream::connect(SocketAddr::from(([127, 0, 0, 1], callback_port))).await?;
    let mut remote_stream = channel.into_stream();
    tokio::io::copy_bidirectional(&mut remote_stream, &mut local).await?;
    Ok(())
}

/// Flag the forwarder as failed when its SSH session goes away
async fn watch_session(
    direction: ForwardDirection,
    session: Arc<Handle<RelayClient>>,
    state: Arc<ForwardState>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(SESSION_WATCH_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if session.is_closed() {
                    tracing::error!("[{}] SSH session closed unexpectedly", direction);
                    state.fail(format!("{} SSH session closed unexpectedly", direction));
                    break;
                }
            }
        }
    }
}

/// russh client handler shared by both directions
struct RelayClient {
    direction: ForwardDirection,
    /// Pinned fingerprint, if any
    expected_fingerprint: Option<String>,
    /// Set to (expected, actual) when the host key is refused
    rejected: Arc<Mutex<Option<(String, String)>>>,
    /// Local port inbound channels are bridged to
    callback_port: u16,
}

#[async_trait]
impl client::Handler for RelayClient {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();

        match &self.expected_fingerprint {
            Some(expected) if expected.trim_start_matches("SHA256:") != fingerprint => {
                tracing::error!(
                    "[{}] Host key mismatch: expected {}, got {}",
                    self.direction,
                    expected,
                    fingerprint
                );
                *self.rejected.lock() = Some((expected.clone(), fingerprint));
                Ok(false)
            }
            Some(_) => {
                tracing::debug!("[{}] Host key verified", self.direction);
                Ok(true)
            }
            None => {
                tracing::info!("[{}] Relay host key: SHA256:{}", self.direction, fingerprint);
                Ok(true)
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            "[inbound] {}:{} from {}:{}",
            connected_address,
            connected_port,
            originator_address,
            originator_port
        );

        let callback_port = self.callback_port;
        tokio::spawn(async move {
            if let Err(e) = relay_inbound(channel, callback_port).await {
                tracing::warn!("[inbound] Callback relay failed: {}", e);
            }
        });
        Ok(())
    }
}
