//! Tunnel command implementation

use std::time::Duration;

use anyhow::{Context, Result};

use crate::output::{format_tunnel_status, print_info, print_warning};
use rb_bridge::{Bridge, TunnelStatus};
use rb_core::BridgeConfig;

const STATUS_INTERVAL: Duration = Duration::from_secs(2);

/// Bring up the SSH tunnel and report its status until interrupted
pub async fn tunnel_command(config: &BridgeConfig) -> Result<()> {
    if !config.tunneling() {
        print_warning("SSH tunneling is disabled in the configuration");
        print_info("Set [ssh] enabled = true to use a relay");
        return Ok(());
    }

    let (bridge, _queue) = Bridge::new();
    if let Err(e) = bridge.ensure_tunnel(config).await {
        bridge.shutdown().await;
        return Err(e).context("Failed to establish SSH tunnel");
    }

    let mut last = bridge.tunnel_status().await;
    println!("{}", format_tunnel_status(&last));
    print_info("Press Ctrl+C to close the tunnel");

    let result = tokio::select! {
        _ = super::shutdown_signal() => Ok(()),
        status = watch(&bridge, &mut last) => Err(anyhow::anyhow!("Tunnel failed: {}", status)),
    };

    bridge.shutdown().await;
    result
}

/// Print status changes; returns once the tunnel reports an error
async fn watch(bridge: &Bridge, last: &mut TunnelStatus) -> String {
    let mut interval = tokio::time::interval(STATUS_INTERVAL);
    loop {
        interval.tick().await;
        let status = bridge.tunnel_status().await;
        if status != *last {
            println!("{}", format_tunnel_status(&status));
            *last = status.clone();
        }
        if let TunnelStatus::Error(message) = status {
            return message;
        }
    }
}
