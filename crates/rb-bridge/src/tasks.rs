//! Hand-off from background workers to the host's polling loop
//!
//! The callback receiver pushes [`CallbackTask`]s from runtime worker
//! threads; the host drains them from its own thread by calling
//! [`TaskQueue::tick`] every [`POLL_INTERVAL`]. The channel is the only
//! point where data crosses from workers to the host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

/// Cadence at which the host is expected to call [`TaskQueue::tick`]
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Where the file behind a task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadOrigin {
    /// A path the service shared with us (same-machine JSON callback)
    SharedPath,
    /// A temp file the receiver wrote from a raw body
    Received,
}

/// One result waiting to be applied to a host resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTask {
    /// File holding the result image
    pub source: PathBuf,
    /// Identifier of the host resource to update
    pub target: String,
    /// Who owns `source`
    pub origin: PayloadOrigin,
}

impl CallbackTask {
    /// Task pointing at a path the service shared
    pub fn shared(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            origin: PayloadOrigin::SharedPath,
        }
    }

    /// Task pointing at a temp file written by the receiver
    pub fn received(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            origin: PayloadOrigin::Received,
        }
    }

    /// Remove the source file if the receiver created it.
    ///
    /// Shared paths belong to the service and are left alone.
    pub fn discard_file(&self) {
        if self.origin != PayloadOrigin::Received {
            return;
        }
        match std::fs::remove_file(&self.source) {
            Ok(()) => tracing::debug!("Removed {}", self.source.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.source.display(), e),
        }
    }
}

/// Errors a host reports when applying a task
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The target resource does not exist (renamed or deleted)
    #[error("Image '{0}' not found")]
    TargetMissing(String),

    /// The resource exists but could not be reloaded
    #[error("Failed to load image: {0}")]
    Load(String),
}

/// The host's view of its image resources.
///
/// Only ever called from the host thread, inside [`TaskQueue::tick`].
pub trait ImageHost {
    /// Point the named image at `path` and reload it from disk
    fn reload_image(&mut self, name: &str, path: &Path) -> Result<(), HostError>;
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was queued
    Idle,
    /// The task was applied
    Applied(CallbackTask),
    /// The target was missing; the task was dropped
    Dropped(CallbackTask),
    /// The host failed to load the file; the file was kept
    Failed(CallbackTask),
}

/// Create a connected producer/consumer pair
pub fn task_queue() -> (TaskSender, TaskQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TaskSender { tx }, TaskQueue { rx })
}

/// Producer side, cloned into every receiver handler
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: mpsc::UnboundedSender<CallbackTask>,
}

impl TaskSender {
    /// Queue a task.
    ///
    /// Returns the task back if the consumer is gone.
    pub fn push(&self, task: CallbackTask) -> Result<(), CallbackTask> {
        self.tx.send(task).map_err(|e| e.0)
    }
}

/// Consumer side, owned by the host thread
#[derive(Debug)]
pub struct TaskQueue {
    rx: mpsc::UnboundedReceiver<CallbackTask>,
}

impl TaskQueue {
    /// Number of tasks waiting
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Apply at most one queued task to `host`. Never blocks.
    pub fn tick<H: ImageHost + ?Sized>(&mut self, host: &mut H) -> TickOutcome {
        let task = match self.rx.try_recv() {
            Ok(task) => task,
            Err(_) => return TickOutcome::Idle,
        };

        match host.reload_image(&task.target, &task.source) {
            Ok(()) => {
                tracing::info!(
                    "Updated image '{}' from {}",
                    task.target,
                    task.source.display()
                );
                task.discard_file();
                TickOutcome::Applied(task)
            }
            Err(HostError::TargetMissing(name)) => {
                tracing::warn!(
                    "Image '{}' not found, dropping result (file kept at {})",
                    name,
                    task.source.display()
                );
                TickOutcome::Dropped(task)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to update image '{}': {} (file kept at {})",
                    task.target,
                    e,
                    task.source.display()
                );
                TickOutcome::Failed(task)
            }
        }
    }

    /// Throw away everything still queued without applying it.
    ///
    /// Returns the number of discarded tasks.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(task) = self.rx.try_recv() {
            task.discard_file();
            discarded += 1;
        }
        if discarded > 0 {
            tracing::info!("Discarded {} pending callback tasks", discarded);
        }
        discarded
    }
}
