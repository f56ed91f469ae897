//! SSH relay settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Settings for reaching the service through an SSH relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Whether to tunnel through the relay at all
    pub enabled: bool,

    /// SSH server host
    pub host: String,

    /// SSH server port. Kept as text because hosts collect it from free-form
    /// input; [`SshSettings::port_number`] validates it.
    pub port: String,

    /// Username for SSH authentication
    pub username: String,

    /// Password, if password authentication is used
    pub password: Option<String>,

    /// Private key, if key authentication is used
    pub key_path: Option<PathBuf>,

    /// Passphrase for an encrypted private key
    pub key_passphrase: Option<String>,

    /// Expected server host key fingerprint. When unset, any host key is
    /// accepted and its fingerprint is logged.
    pub host_key_fingerprint: Option<String>,

    /// Keepalive interval
    #[serde(with = "duration_secs")]
    pub keepalive: Duration,

    /// SSH connect timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: "22".to_string(),
            username: String::new(),
            password: None,
            key_path: None,
            key_passphrase: None,
            host_key_fingerprint: None,
            keepalive: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl SshSettings {
    /// SSH port as a number
    pub fn port_number(&self) -> Result<u16, ConfigError> {
        self.port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ConfigError::InvalidPort {
                field: "ssh.port",
                value: self.port.clone(),
            })
    }

    /// Password, ignoring an empty string
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Key path, ignoring an empty path
    pub fn key_path(&self) -> Option<&PathBuf> {
        self.key_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Check the settings needed to open a tunnel
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh.host".to_string()));
        }
        self.port_number()?;
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh.username".to_string()));
        }
        if self.password().is_none() && self.key_path().is_none() {
            return Err(ConfigError::MissingField(
                "ssh.password or ssh.key_path".to_string(),
            ));
        }
        Ok(())
    }
}
