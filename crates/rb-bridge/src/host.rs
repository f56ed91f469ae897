//! Blocking facade for single-threaded hosts
//!
//! The host thread calls these methods synchronously; the receiver and
//! the forwarders keep running on the runtime's worker threads between
//! calls. Every call is bounded by the configured timeouts.

use std::net::SocketAddr;

use tokio::runtime::{Builder, Runtime};

use rb_core::{BridgeConfig, BridgeError, ConnectionStatus};
use rb_protocol::{Reply, Request};

use crate::receiver::ReceiverState;
use crate::session::{Bridge, TransferJob};
use crate::tasks::TaskQueue;
use crate::transport::{TransferOutcome, TransportError};
use crate::tunnel::TunnelStatus;

/// Worker threads backing the receiver and the two forwarders
const WORKER_THREADS: usize = 2;

/// [`Bridge`] driven from a thread without a runtime
pub struct BlockingBridge {
    runtime: Runtime,
    bridge: Bridge,
}

impl BlockingBridge {
    /// Build the runtime and the bridge
    pub fn new() -> std::io::Result<(Self, TaskQueue)> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("render-bridge")
            .enable_all()
            .build()?;
        let (bridge, queue) = Bridge::new();
        Ok((Self { runtime, bridge }, queue))
    }

    /// The async bridge
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// See [`Bridge::start_receiver`]
    pub fn start_receiver(&self, config: &BridgeConfig) -> Result<SocketAddr, BridgeError> {
        self.runtime.block_on(self.bridge.start_receiver(config))
    }

    /// See [`Bridge::stop_receiver`]
    pub fn stop_receiver(&self) {
        self.runtime.block_on(self.bridge.stop_receiver())
    }

    /// See [`Bridge::receiver_state`]
    pub fn receiver_state(&self) -> ReceiverState {
        self.runtime.block_on(self.bridge.receiver_state())
    }

    /// See [`Bridge::ensure_tunnel`]
    pub fn ensure_tunnel(&self, config: &BridgeConfig) -> Result<(), BridgeError> {
        self.runtime.block_on(self.bridge.ensure_tunnel(config))
    }

    /// See [`Bridge::test_connection`]
    pub fn test_connection(&self, config: &BridgeConfig) -> Result<ConnectionStatus, BridgeError> {
        self.runtime.block_on(self.bridge.test_connection(config))
    }

    /// See [`Bridge::send_file`]
    pub fn send_file(
        &self,
        config: &BridgeConfig,
        job: TransferJob,
    ) -> Result<TransferOutcome, BridgeError> {
        self.runtime.block_on(self.bridge.send_file(config, job))
    }

    /// See [`Bridge::request`]
    pub fn request(
        &self,
        config: &BridgeConfig,
        request: Request,
    ) -> Result<Result<Reply, TransportError>, BridgeError> {
        self.runtime.block_on(self.bridge.request(config, request))
    }

    /// See [`Bridge::connection_status`]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.bridge.connection_status()
    }

    /// See [`Bridge::tunnel_status`]
    pub fn tunnel_status(&self) -> TunnelStatus {
        self.runtime.block_on(self.bridge.tunnel_status())
    }

    /// Stop everything and drop the runtime
    pub fn shutdown(self) {
        self.runtime.block_on(self.bridge.shutdown());
    }
}
