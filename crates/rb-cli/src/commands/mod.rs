//! CLI command implementations

mod config;
mod listen;
mod ping;
mod send;
mod tunnel;

pub use config::{config_init, config_path, config_show, load_bridge_config, Overrides};
pub use listen::{listen_command, ListenOptions};
pub use ping::ping_command;
pub use send::{parse_channel, send_command, SendOptions};
pub use tunnel::tunnel_command;

/// Resolves once Ctrl+C (or SIGTERM on unix) arrives
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
