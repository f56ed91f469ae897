//! Holder for the one live tunnel manager

use std::sync::Arc;

use tokio::sync::Mutex;

use super::manager::{TunnelManager, TunnelStatus};

/// At most one [`TunnelManager`] at a time.
///
/// Creation and teardown go through the same lock, so concurrent start and
/// stop callers cannot interleave.
#[derive(Default)]
pub struct TunnelSlot {
    current: Mutex<Option<Arc<TunnelManager>>>,
}

impl TunnelSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing manager, or build one with `create`.
    ///
    /// An existing manager is returned as is; new settings only take effect
    /// after [`TunnelSlot::stop`].
    pub async fn get_or_create<F, E>(&self, create: F) -> Result<Arc<TunnelManager>, E>
    where
        F: FnOnce() -> Result<TunnelManager, E>,
    {
        let mut current = self.current.lock().await;
        if let Some(manager) = current.as_ref() {
            return Ok(Arc::clone(manager));
        }

        let manager = Arc::new(create()?);
        *current = Some(Arc::clone(&manager));
        tracing::debug!("Created tunnel manager");
        Ok(manager)
    }

    /// The live manager, if any
    pub async fn current(&self) -> Option<Arc<TunnelManager>> {
        self.current.lock().await.clone()
    }

    /// Stop and drop the live manager. Does nothing if there is none.
    pub async fn stop(&self) {
        let mut current = self.current.lock().await;
        if let Some(manager) = current.take() {
            manager.stop().await;
            tracing::info!("Tunnel torn down");
        }
    }

    /// Status of the live manager, `Inactive` when there is none
    pub async fn status(&self) -> TunnelStatus {
        match self.current.lock().await.as_ref() {
            Some(manager) => manager.status(),
            None => TunnelStatus::Inactive,
        }
    }
}
