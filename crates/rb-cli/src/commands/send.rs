//! Send command implementation

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use super::listen::run_host_loop;
use crate::host::DirectoryHost;
use crate::output::{print_info, print_success, print_warning};
use rb_bridge::session::service_address;
use rb_bridge::{Bridge, TransferJob};
use rb_core::BridgeConfig;
use rb_protocol::{ChannelMapBuilder, RenderPass, RenderType};

/// Options for `render-bridge send`
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub file: PathBuf,
    pub render_type: RenderType,
    /// Explicit `logical=channel` entries
    pub channels: Vec<(String, String)>,
    /// View layer used for `passes` and `aovs`
    pub layer: Option<String>,
    pub passes: Vec<String>,
    pub aovs: Vec<String>,
    pub keep_source: bool,
    /// Wait for the result and write it here
    pub wait: Option<PathBuf>,
    pub wait_timeout: Duration,
}

impl SendOptions {
    fn channel_map(&self) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();

        if self.layer.is_some() || !self.passes.is_empty() || !self.aovs.is_empty() {
            let layer = self.layer.as_deref().unwrap_or("ViewLayer");
            let mut builder = ChannelMapBuilder::new(layer);
            for name in &self.passes {
                let pass = RenderPass::from_logical_name(name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown render pass: {}", name))?;
                builder = builder.pass(pass);
            }
            for aov in &self.aovs {
                builder = builder.aov(aov);
            }
            map.extend(builder.build());
        }

        for (logical, channel) in &self.channels {
            map.insert(logical.clone(), channel.clone());
        }
        Ok(map)
    }

    fn job(&self) -> Result<TransferJob> {
        let mut job = TransferJob::new(&self.file, self.render_type)
            .with_channel_map(self.channel_map()?);
        if self.keep_source {
            job = job.keep_source();
        }
        Ok(job)
    }
}

/// Parse a `key=value` channel argument
pub fn parse_channel(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected LOGICAL=CHANNEL, got '{}'", arg)),
    }
}

/// Send one file to the service, optionally waiting for the result
pub async fn send_command(config: &BridgeConfig, options: SendOptions) -> Result<()> {
    let job = options.job()?;
    let address = service_address(config)?;

    let (bridge, mut queue) = Bridge::new();

    let mut host = match &options.wait {
        Some(dir) => {
            let host = DirectoryHost::new(dir)
                .with_context(|| format!("Failed to create output directory: {:?}", dir))?;
            let addr = bridge.start_receiver(config).await?;
            print_info(&format!("Receiver listening on {}", addr));
            Some(host)
        }
        None => None,
    };

    print_info(&format!("Sending {:?} to {}", options.file, address));
    let outcome = match bridge.send_file(config, job).await {
        Ok(outcome) => outcome,
        Err(e) => {
            bridge.shutdown().await;
            return Err(e).context("Transfer failed");
        }
    };

    if !outcome.is_delivered() {
        bridge.shutdown().await;
        anyhow::bail!("Transfer failed: {}", outcome);
    }
    print_success("Transfer accepted");

    let result = match host.as_mut() {
        Some(host) => {
            print_info("Waiting for the result, press Ctrl+C to stop");
            tokio::select! {
                _ = super::shutdown_signal() => {
                    print_warning("Stopped before a result arrived");
                    Ok(())
                }
                _ = tokio::time::sleep(options.wait_timeout) => {
                    Err(anyhow::anyhow!("No result within {:?}", options.wait_timeout))
                }
                _ = run_host_loop(&mut queue, host, Some(1)) => Ok(()),
            }
        }
        None => Ok(()),
    };

    queue.discard_pending();
    bridge.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SendOptions {
        SendOptions {
            file: PathBuf::from("render.exr"),
            render_type: RenderType::MultilayerExr,
            channels: Vec::new(),
            layer: None,
            passes: Vec::new(),
            aovs: Vec::new(),
            keep_source: false,
            wait: None,
            wait_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_parse_channel() {
        assert_eq!(
            parse_channel("depth=ViewLayer.Depth"),
            Ok(("depth".to_string(), "ViewLayer.Depth".to_string()))
        );
        assert!(parse_channel("depth").is_err());
        assert!(parse_channel("=x").is_err());
    }

    #[test]
    fn test_channel_map_from_passes() {
        let options = SendOptions {
            layer: Some("Main".to_string()),
            passes: vec!["depth".to_string(), "normal".to_string()],
            aovs: vec!["My Mask".to_string()],
            channels: vec![("depth".to_string(), "Custom.Z".to_string())],
            ..options()
        };

        let map = options.channel_map().unwrap();
        assert_eq!(map.get("depth").map(String::as_str), Some("Custom.Z"));
        assert_eq!(map.get("normal").map(String::as_str), Some("Main.Normal"));
        assert_eq!(map.get("my_mask").map(String::as_str), Some("Main.My Mask"));
    }

    #[test]
    fn test_unknown_pass_rejected() {
        let options = SendOptions {
            passes: vec!["sparkle".to_string()],
            ..options()
        };
        assert!(options.channel_map().is_err());
    }

    #[test]
    fn test_empty_map_without_layer_options() {
        assert!(options().channel_map().unwrap().is_empty());
    }

    #[test]
    fn test_keep_source_respected() {
        let options = SendOptions {
            file: std::env::temp_dir().join("render_bridge_keep.png"),
            keep_source: true,
            ..options()
        };
        assert!(!options.job().unwrap().remove_source);
    }
}
