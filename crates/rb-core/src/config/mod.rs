//! Configuration management for the render bridge

mod bridge;
pub mod serde_utils;
mod ssh;

pub use bridge::{BridgeConfig, TimeoutConfig, MIN_RECEIVER_PORT};
pub use ssh::SshSettings;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("render-bridge")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    tracing::debug!("Saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = BridgeConfig::default();
        config.receiver_port = 6000;
        config.target_image = Some("Render Result".to_string());
        config.ssh.enabled = true;
        config.ssh.host = "relay.example.com".to_string();

        save_config(&path, &config).unwrap();
        let loaded: BridgeConfig = load_config(&path).unwrap();

        assert_eq!(loaded.receiver_port, 6000);
        assert_eq!(loaded.target_image.as_deref(), Some("Render Result"));
        assert!(loaded.ssh.enabled);
        assert_eq!(loaded.ssh.host, "relay.example.com");
        assert_eq!(loaded.timeouts, config.timeouts);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<BridgeConfig, _> = load_config(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "service_address = \"gpu-box:5555\"\n").unwrap();

        let loaded: BridgeConfig = load_config(&path).unwrap();
        assert_eq!(loaded.service_address, "gpu-box:5555");
        assert_eq!(loaded.receiver_port, 5556);
        assert!(!loaded.ssh.enabled);
    }
}
