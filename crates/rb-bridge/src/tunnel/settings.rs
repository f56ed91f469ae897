//! Validated settings for one tunnel session

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rb_core::{BridgeConfig, ConfigError, Endpoint};

/// How to authenticate against the relay
#[derive(Clone)]
pub enum SshAuth {
    /// Password authentication
    Password(String),
    /// Private key, optionally encrypted
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(***)"),
            SshAuth::Key { path, passphrase } => f
                .debug_struct("Key")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

/// Everything a [`super::TunnelManager`] needs, checked up front
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    /// The SSH relay
    pub ssh: Endpoint,
    /// SSH user
    pub username: String,
    /// Credentials
    pub auth: SshAuth,
    /// Pinned host key fingerprint
    pub host_key_fingerprint: Option<String>,
    /// The service as reachable from the relay
    pub remote_service: Endpoint,
    /// Local port the outbound forwarder listens on
    pub local_service_port: u16,
    /// Local callback receiver port, also bound on the relay
    pub callback_port: u16,
    /// SSH keepalive interval
    pub keepalive: Duration,
    /// SSH connect timeout
    pub connect_timeout: Duration,
}

impl TunnelSettings {
    /// Build settings from a connection config.
    ///
    /// Fails on a non-numeric SSH port or a service address without
    /// `host:port`. The outbound listener reuses the remote service port.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        let ssh = &config.ssh;
        let port = ssh.port_number()?;

        if ssh.host.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh.host".to_string()));
        }
        if ssh.username.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh.username".to_string()));
        }

        let remote_service = config.service_endpoint()?;

        // Key auth wins when both are configured
        let auth = match (ssh.key_path(), ssh.password()) {
            (Some(path), _) => SshAuth::Key {
                path: path.clone(),
                passphrase: ssh.key_passphrase.clone().filter(|p| !p.is_empty()),
            },
            (None, Some(password)) => SshAuth::Password(password.to_string()),
            (None, None) => {
                return Err(ConfigError::MissingField(
                    "ssh.password or ssh.key_path".to_string(),
                ))
            }
        };

        Ok(Self {
            ssh: Endpoint::new(ssh.host.trim(), port),
            username: ssh.username.trim().to_string(),
            auth,
            host_key_fingerprint: ssh
                .host_key_fingerprint
                .clone()
                .filter(|f| !f.trim().is_empty()),
            local_service_port: remote_service.port,
            remote_service,
            callback_port: config.receiver_port,
            keepalive: ssh.keepalive,
            connect_timeout: ssh.connect_timeout,
        })
    }
}
