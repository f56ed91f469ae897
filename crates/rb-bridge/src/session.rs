//! Session orchestration
//!
//! [`Bridge`] is the context object a host holds for the lifetime of the
//! integration. It sequences tunnel establishment, address resolution,
//! transfers and teardown, and owns the receiver and the tunnel slot.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use rb_core::types::LOOPBACK_HOST;
use rb_core::{
    BridgeConfig, BridgeError, ConfigError, ConnectionStatus, Endpoint, Route, TunnelError,
};
use rb_protocol::{Metadata, RenderType, Reply, Request, ReturnInfo, TransferMetadata};

use crate::receiver::{CallbackReceiver, ReceiverState};
use crate::tasks::{task_queue, TaskQueue};
use crate::transport::{self, DEFAULT_SCHEME};
use crate::tunnel::{TunnelManager, TunnelSettings, TunnelSlot, TunnelStatus};

/// Interval between tunnel status checks while waiting for it to come up
pub const TUNNEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

type TunnelFactory = Box<dyn Fn(&BridgeConfig) -> Result<TunnelManager, ConfigError> + Send + Sync>;

/// How the service is reached for this config
pub fn resolve_route(config: &BridgeConfig) -> Result<Route, ConfigError> {
    let endpoint = config.service_endpoint()?;
    if config.tunneling() {
        let local_port = endpoint.port;
        Ok(Route::Tunneled {
            remote: endpoint,
            local_port,
        })
    } else {
        Ok(Route::Direct(endpoint))
    }
}

/// Address the transport should connect to.
///
/// Tunneled routes always resolve to the local forwarding port; direct
/// routes use the configured address as is.
pub fn service_address(config: &BridgeConfig) -> Result<String, ConfigError> {
    match resolve_route(config)? {
        route @ Route::Tunneled { .. } => {
            Ok(format!("{}{}", DEFAULT_SCHEME, route.connect_endpoint()))
        }
        Route::Direct(_) => Ok(config.service_address.trim().to_string()),
    }
}

/// Callback URL the service should POST results to
pub fn callback_address(config: &BridgeConfig) -> String {
    let host = match config.public_address() {
        Some(public) if !config.tunneling() => public,
        _ => LOOPBACK_HOST,
    };
    format!(
        "http://{}",
        Endpoint::new(host.trim_matches(|c| c == '[' || c == ']'), config.receiver_port)
    )
}

/// A file to send to the service
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// File to read and send
    pub source: PathBuf,
    /// How the service should interpret the file
    pub render_type: RenderType,
    /// Logical pass name to EXR channel name
    pub channel_map: BTreeMap<String, String>,
    /// Host image to update; falls back to the configured target
    pub target: Option<String>,
    /// Additional metadata fields
    pub extra: Metadata,
    /// Remove `source` after the exchange
    pub remove_source: bool,
}

impl TransferJob {
    /// Job for `source`. The file is removed afterwards only when it lives
    /// in the system temp directory.
    pub fn new(source: impl Into<PathBuf>, render_type: RenderType) -> Self {
        let source = source.into();
        let remove_source = is_in_temp_dir(&source);
        Self {
            source,
            render_type,
            channel_map: BTreeMap::new(),
            target: None,
            extra: Metadata::new(),
            remove_source,
        }
    }

    /// Set the channel map
    pub fn with_channel_map(mut self, channel_map: BTreeMap<String, String>) -> Self {
        self.channel_map = channel_map;
        self
    }

    /// Override the target image
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Keep the source file regardless of where it lives
    pub fn keep_source(mut self) -> Self {
        self.remove_source = false;
        self
    }

    fn filename(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn is_in_temp_dir(path: &Path) -> bool {
    let temp = std::env::temp_dir();
    let temp = temp.canonicalize().unwrap_or(temp);
    let path = match path.canonicalize() {
        Ok(path) => path,
        Err(_) if path.is_relative() => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    };
    path.starts_with(&temp)
}

fn remove_source(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!("Removed temporary file {}", path.display()),
        Err(e) => tracing::warn!("Failed to remove temporary file {}: {}", path.display(), e),
    }
}

/// Context object for one host integration
pub struct Bridge {
    tunnel: TunnelSlot,
    receiver: tokio::sync::Mutex<CallbackReceiver>,
    status: Mutex<ConnectionStatus>,
    tunnel_factory: TunnelFactory,
}

impl Bridge {
    /// Create the bridge and the queue the host drains from its polling loop
    pub fn new() -> (Self, TaskQueue) {
        let (tasks, queue) = task_queue();
        let bridge = Self {
            tunnel: TunnelSlot::new(),
            receiver: tokio::sync::Mutex::new(CallbackReceiver::new(tasks)),
            status: Mutex::new(ConnectionStatus::Disconnected),
            tunnel_factory: Box::new(|config| {
                Ok(TunnelManager::new(TunnelSettings::from_config(config)?))
            }),
        };
        (bridge, queue)
    }

    /// Replace how tunnel managers are built
    pub fn with_tunnel_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&BridgeConfig) -> Result<TunnelManager, ConfigError> + Send + Sync + 'static,
    {
        self.tunnel_factory = Box::new(factory);
        self
    }

    /// Write raw callback bodies into `dir`
    pub fn with_receiver_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.receiver = tokio::sync::Mutex::new(self.receiver.into_inner().with_temp_dir(dir));
        self
    }

    /// Start (or restart) the callback receiver on `config.receiver_port`.
    ///
    /// The configured target image is captured as the default target.
    pub async fn start_receiver(&self, config: &BridgeConfig) -> Result<SocketAddr, BridgeError> {
        config.validate()?;
        let mut receiver = self.receiver.lock().await;
        let addr = receiver
            .start(config.receiver_port, config.target().map(str::to_string))
            .await?;
        Ok(addr)
    }

    /// Stop the callback receiver
    pub async fn stop_receiver(&self) {
        self.receiver.lock().await.stop().await;
    }

    /// Receiver lifecycle state
    pub async fn receiver_state(&self) -> ReceiverState {
        self.receiver.lock().await.state()
    }

    /// Address the receiver is bound to, while running
    pub async fn receiver_addr(&self) -> Option<SocketAddr> {
        self.receiver.lock().await.local_addr()
    }

    /// Make sure the tunnel is active when tunneling is configured.
    ///
    /// Polls every [`TUNNEL_POLL_INTERVAL`] up to the configured bound. An
    /// errored tunnel is torn down, recreated and waited on once more.
    pub async fn ensure_tunnel(&self, config: &BridgeConfig) -> Result<(), BridgeError> {
        if !config.tunneling() {
            return Ok(());
        }

        let bound = config.timeouts.tunnel_establish;
        match self.wait_for_tunnel(config, bound).await? {
            TunnelStatus::Active => Ok(()),
            TunnelStatus::Error(message) => {
                tracing::warn!("Tunnel in error state ({}), recreating", message);
                self.tunnel.stop().await;
                match self.wait_for_tunnel(config, bound).await? {
                    TunnelStatus::Active => Ok(()),
                    TunnelStatus::Error(message) => Err(TunnelError::Failed(message).into()),
                    TunnelStatus::Inactive => Err(TunnelError::Timeout(bound).into()),
                }
            }
            TunnelStatus::Inactive => {
                tracing::warn!("Tunnel did not become active within {:?}", bound);
                Err(TunnelError::Timeout(bound).into())
            }
        }
    }

    async fn wait_for_tunnel(
        &self,
        config: &BridgeConfig,
        bound: Duration,
    ) -> Result<TunnelStatus, BridgeError> {
        let manager = self
            .tunnel
            .get_or_create(|| (self.tunnel_factory)(config))
            .await?;
        manager.start();

        let deadline = tokio::time::Instant::now() + bound;
        loop {
            let status = manager.status();
            match status {
                TunnelStatus::Active | TunnelStatus::Error(_) => return Ok(status),
                TunnelStatus::Inactive if tokio::time::Instant::now() >= deadline => {
                    return Ok(status)
                }
                TunnelStatus::Inactive => tokio::time::sleep(TUNNEL_POLL_INTERVAL).await,
            }
        }
    }

    /// Ping the service and record the connection status.
    ///
    /// Configuration and tunnel problems come back as errors so they are
    /// not mistaken for an unreachable service.
    pub async fn test_connection(
        &self,
        config: &BridgeConfig,
    ) -> Result<ConnectionStatus, BridgeError> {
        config.validate()?;
        *self.status.lock() = ConnectionStatus::Disconnected;

        if let Err(e) = self.ensure_tunnel(config).await {
            *self.status.lock() = ConnectionStatus::Failed;
            return Err(e);
        }

        let address = service_address(config)?;
        let status = if transport::ping(&address, config.timeouts.ping).await {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Failed
        };

        tracing::info!("Connection to {}: {}", address, status);
        *self.status.lock() = status;
        Ok(status)
    }

    /// Send a file to the service.
    ///
    /// A source that cannot be read fails before any network activity.
    pub async fn send_file(
        &self,
        config: &BridgeConfig,
        job: TransferJob,
    ) -> Result<transport::TransferOutcome, BridgeError> {
        config.validate()?;

        let target = job
            .target
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| config.target().map(str::to_string))
            .ok_or_else(|| ConfigError::MissingField("target_image".to_string()))?;

        let data = tokio::fs::read(&job.source)
            .await
            .map_err(|source| BridgeError::ReadSource {
                path: job.source.clone(),
                source,
            })?;
        tracing::info!("Read '{}' ({} bytes)", job.filename(), data.len());

        let result = self.exchange(config, &job, target, data).await;

        if job.remove_source {
            remove_source(&job.source);
        }
        result
    }

    async fn exchange(
        &self,
        config: &BridgeConfig,
        job: &TransferJob,
        target: String,
        data: Vec<u8>,
    ) -> Result<transport::TransferOutcome, BridgeError> {
        self.ensure_tunnel(config).await?;

        let mut metadata = TransferMetadata::new(
            job.filename(),
            ReturnInfo {
                blender_server_address: callback_address(config),
                image_datablock_name: target,
            },
            job.render_type,
        )
        .with_channel_map(job.channel_map.clone());
        for (key, value) in &job.extra {
            metadata = metadata.with_field(key.clone(), value.clone());
        }

        tracing::debug!("Transfer metadata: {:?}", metadata);
        let request = Request::transfer(metadata, Some(Bytes::from(data)));
        let address = service_address(config)?;

        let outcome = transport::send(&address, request, config.timeouts.transfer).await;
        if outcome.is_delivered() {
            tracing::info!("Data sent to {}", address);
        } else {
            tracing::error!("Transfer to {} failed: {}", address, outcome);
        }
        Ok(outcome)
    }

    /// Send an arbitrary request and hand back the service's reply.
    ///
    /// The outer error covers configuration and tunnel problems; the inner
    /// one is the exchange itself failing.
    pub async fn request(
        &self,
        config: &BridgeConfig,
        request: Request,
    ) -> Result<Result<Reply, transport::TransportError>, BridgeError> {
        config.validate()?;
        self.ensure_tunnel(config).await?;

        let address = service_address(config)?;
        let result = transport::request(&address, request, config.timeouts.request).await;
        if let Err(e) = &result {
            tracing::warn!("Request to {} failed: {}", address, e);
        }
        Ok(result)
    }

    /// Last recorded connection status
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    /// Status of the tunnel, `Inactive` when none exists
    pub async fn tunnel_status(&self) -> TunnelStatus {
        self.tunnel.status().await
    }

    /// Tear the tunnel down without touching the receiver
    pub async fn stop_tunnel(&self) {
        self.tunnel.stop().await;
    }

    /// Stop the receiver and the tunnel
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down bridge");
        self.stop_receiver().await;
        self.tunnel.stop().await;
        *self.status.lock() = ConnectionStatus::Disconnected;
    }
}
