//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use rb_core::config::{self, BridgeConfig};

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub service_address: Option<String>,
    pub receiver_port: Option<u16>,
    pub target_image: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(address) = &self.service_address {
            config.service_address = address.clone();
        }
        if let Some(port) = self.receiver_port {
            config.receiver_port = port;
        }
        if let Some(target) = &self.target_image {
            config.target_image = Some(target.clone());
        }
    }
}

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Load the bridge configuration and apply overrides.
///
/// A missing default config file means defaults; a missing file that was
/// named explicitly is an error. The result is validated.
pub fn load_bridge_config(
    config_path: Option<&PathBuf>,
    overrides: &Overrides,
) -> Result<BridgeConfig> {
    let path = resolve_path(config_path);

    let mut bridge_config = if path.exists() {
        config::load_config::<BridgeConfig>(&path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?
    } else if config_path.is_some() {
        anyhow::bail!("Config file not found: {:?}", path);
    } else {
        tracing::debug!("No config file at {:?}, using defaults", path);
        BridgeConfig::default()
    };

    overrides.apply(&mut bridge_config);
    bridge_config
        .validate()
        .context("Invalid configuration")?;
    Ok(bridge_config)
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'render-bridge config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    println!("{}", content);

    Ok(())
}

/// Write the default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &BridgeConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Created configuration file: {:?}", path));
    print_info("Set target_image, and [ssh] enabled = true to go through a relay");

    Ok(())
}

/// Print the config file path
pub fn config_path(config_path: Option<&PathBuf>) -> Result<()> {
    println!("{}", resolve_path(config_path).display());
    Ok(())
}
