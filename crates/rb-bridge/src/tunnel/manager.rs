//! Supervision of the forwarder pair
//!
//! Each forwarder runs under its own supervisor task. Both tasks share one
//! `running` token; whichever side fails first records the error and
//! cancels the token, which makes the sibling stop its forwarder and exit
//! within one poll interval.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::forwarder::{ForwardDirection, Forwarder, SshForwarder};
use super::settings::TunnelSettings;

/// How often a supervisor checks its forwarder and the running flag
pub const SUPERVISOR_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bound on waiting for a supervisor task during stop
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Error recorded when a supervisor ends without reporting why
const WORKER_DIED: &str = "A tunnel worker exited unexpectedly";

/// Combined state of the tunnel pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStatus {
    /// Not started, stopped, or still coming up
    Inactive,
    /// Both directions are forwarding
    Active,
    /// Sticky failure, cleared only by recreating the manager
    Error(String),
}

impl TunnelStatus {
    /// Upper-case status label
    pub fn label(&self) -> &'static str {
        match self {
            TunnelStatus::Inactive => "INACTIVE",
            TunnelStatus::Active => "ACTIVE",
            TunnelStatus::Error(_) => "ERROR",
        }
    }

    /// Whether both directions are forwarding
    pub fn is_active(&self) -> bool {
        matches!(self, TunnelStatus::Active)
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelStatus::Error(message) => write!(f, "ERROR: {}", message),
            other => f.write_str(other.label()),
        }
    }
}

struct SupervisorRun {
    running: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// Owns the outbound/inbound forwarder pair and their supervisors
pub struct TunnelManager {
    outbound: Arc<dyn Forwarder>,
    inbound: Arc<dyn Forwarder>,
    error: Arc<Mutex<Option<String>>>,
    run: Mutex<Option<SupervisorRun>>,
}

impl TunnelManager {
    /// Manager with SSH forwarders for the given settings
    pub fn new(settings: TunnelSettings) -> Self {
        let settings = Arc::new(settings);
        Self::with_forwarders(
            Arc::new(SshForwarder::new(
                ForwardDirection::Outbound,
                Arc::clone(&settings),
            )),
            Arc::new(SshForwarder::new(ForwardDirection::Inbound, settings)),
        )
    }

    /// Manager over arbitrary forwarders
    pub fn with_forwarders(outbound: Arc<dyn Forwarder>, inbound: Arc<dyn Forwarder>) -> Self {
        Self {
            outbound,
            inbound,
            error: Arc::new(Mutex::new(None)),
            run: Mutex::new(None),
        }
    }

    /// Spawn both supervisors.
    ///
    /// No-op when already running or in the error state. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) {
        let mut run = self.run.lock();
        if run.is_some() {
            tracing::debug!("Tunnel already started");
            return;
        }
        if let Some(error) = self.error.lock().as_deref() {
            tracing::debug!("Tunnel is in error state, not starting: {}", error);
            return;
        }

        tracing::info!("Starting SSH tunnel");
        let running = CancellationToken::new();
        let workers = [&self.outbound, &self.inbound]
            .into_iter()
            .map(|forwarder| {
                tokio::spawn(supervise(
                    Arc::clone(forwarder),
                    running.clone(),
                    Arc::clone(&self.error),
                ))
            })
            .collect();

        *run = Some(SupervisorRun { running, workers });
    }

    /// Stop both supervisors, waiting a bounded time for each.
    ///
    /// Calling stop on a stopped manager does nothing. A recorded error
    /// stays recorded.
    pub async fn stop(&self) {
        let Some(run) = self.run.lock().take() else {
            return;
        };

        tracing::info!("Stopping SSH tunnel");
        run.running.cancel();

        for mut worker in run.workers {
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, &mut worker)
                .await
                .is_err()
            {
                tracing::warn!(
                    "Tunnel worker did not exit within {:?}, aborting",
                    WORKER_JOIN_TIMEOUT
                );
                worker.abort();
            }
        }

        // Supervisors stop their forwarder on exit; this covers aborted ones
        self.outbound.stop().await;
        self.inbound.stop().await;
    }

    /// Current combined status
    pub fn status(&self) -> TunnelStatus {
        if let Some(error) = self.error.lock().clone() {
            return TunnelStatus::Error(error);
        }

        let run = self.run.lock();
        let Some(run) = run.as_ref() else {
            return TunnelStatus::Inactive;
        };
        if run.running.is_cancelled() {
            return TunnelStatus::Inactive;
        }

        if run.workers.iter().any(JoinHandle::is_finished) {
            tracing::error!("{}", WORKER_DIED);
            record_error(&self.error, WORKER_DIED.to_string());
            run.running.cancel();
            return TunnelStatus::Error(WORKER_DIED.to_string());
        }

        if self.outbound.is_active() && self.inbound.is_active() {
            TunnelStatus::Active
        } else {
            TunnelStatus::Inactive
        }
    }

    /// Whether the supervisors are running
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|run| !run.running.is_cancelled())
    }

    /// The recorded error, if any
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }
}

/// Record an error unless one is already recorded
fn record_error(error: &Mutex<Option<String>>, message: String) {
    let mut error = error.lock();
    if error.is_none() {
        *error = Some(message);
    }
}

async fn supervise(
    forwarder: Arc<dyn Forwarder>,
    running: CancellationToken,
    error: Arc<Mutex<Option<String>>>,
) {
    let direction = forwarder.direction();
    let fail = |message: String| {
        tracing::error!("[{}] {}", direction, message);
        record_error(&error, message);
        running.cancel();
    };

    let started = tokio::select! {
        _ = running.cancelled() => None,
        result = forwarder.start() => Some(result),
    };

    match started {
        None => tracing::debug!("[{}] Stopped before the forwarder came up", direction),
        Some(Err(e)) => fail(format!("Failed to start {} tunnel: {}", direction, e)),
        Some(Ok(())) => {
            tracing::info!("[{}] Tunnel forwarder active", direction);
            let mut interval = tokio::time::interval(SUPERVISOR_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = running.cancelled() => break,
                    _ = interval.tick() => {
                        if let Some(reason) = forwarder.failure() {
                            fail(format!("{} tunnel failed: {}", direction, reason));
                            break;
                        }
                    }
                }
            }
        }
    }

    forwarder.stop().await;
    tracing::debug!("[{}] Supervisor exited", direction);
}
