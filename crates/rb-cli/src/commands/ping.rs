//! Ping command implementation

use anyhow::Result;

use crate::output::{format_connection_status, print_info};
use rb_bridge::session::{service_address, Bridge};
use rb_core::{BridgeConfig, ConnectionStatus};

/// Test the connection to the service, bringing the tunnel up if needed
pub async fn ping_command(config: &BridgeConfig) -> Result<()> {
    let address = service_address(config)?;
    if config.tunneling() {
        print_info(&format!(
            "Connecting through {}@{}:{}",
            config.ssh.username, config.ssh.host, config.ssh.port
        ));
    }

    let (bridge, _queue) = Bridge::new();
    let result = bridge.test_connection(config).await;
    bridge.shutdown().await;

    match result {
        Ok(status) => {
            println!("{}", format_connection_status(status, &address));
            if status != ConnectionStatus::Connected {
                anyhow::bail!("No reply from {}", address);
            }
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Connection test failed")),
    }
}
