//! Connection configuration supplied by the host

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use super::SshSettings;
use crate::error::ConfigError;
use crate::types::Endpoint;

/// Lowest port the callback receiver may bind
pub const MIN_RECEIVER_PORT: u16 = 1024;

/// Configuration for one connection attempt
///
/// Built by the host from its settings, validated once, then passed down
/// to every operation of the attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Request/reply address of the image service, e.g. `tcp://127.0.0.1:5555`
    pub service_address: String,

    /// Port of the local callback receiver (1024-65535)
    pub receiver_port: u16,

    /// Public host name or IP the service should call back to, when the
    /// service reaches this machine without a tunnel
    pub public_address_override: Option<String>,

    /// Host image that processed results update
    pub target_image: Option<String>,

    /// Request timeouts
    pub timeouts: TimeoutConfig,

    /// SSH relay settings
    pub ssh: SshSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            service_address: "tcp://127.0.0.1:5555".to_string(),
            receiver_port: 5556,
            public_address_override: None,
            target_image: None,
            timeouts: TimeoutConfig::default(),
            ssh: SshSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Check every field before any network operation is attempted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receiver_port < MIN_RECEIVER_PORT {
            return Err(ConfigError::PortOutOfRange {
                field: "receiver_port",
                value: self.receiver_port,
                min: MIN_RECEIVER_PORT,
            });
        }

        self.service_endpoint()?;

        if let Some(public) = self.public_address() {
            if public.contains("://") || public.chars().any(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "public_address_override '{}' must be a bare host name or IP",
                    public
                )));
            }
        }

        self.timeouts.validate()?;

        if self.ssh.enabled {
            self.ssh.validate()?;
        }

        Ok(())
    }

    /// The configured service address as host and port
    pub fn service_endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::parse(&self.service_address)
    }

    /// Public address override, ignoring blank values
    pub fn public_address(&self) -> Option<&str> {
        self.public_address_override
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Target image, ignoring blank values
    pub fn target(&self) -> Option<&str> {
        self.target_image
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    /// Whether connections go through the SSH relay
    pub fn tunneling(&self) -> bool {
        self.ssh.enabled
    }
}

/// Timeouts for request/reply exchanges and tunnel establishment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Ping timeout
    #[serde(with = "duration_millis")]
    pub ping: Duration,

    /// Transfer timeout
    #[serde(with = "duration_millis")]
    pub transfer: Duration,

    /// Generic request timeout
    #[serde(with = "duration_millis")]
    pub request: Duration,

    /// How long to wait for the tunnel to become active
    #[serde(with = "duration_millis")]
    pub tunnel_establish: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ping: Duration::from_secs(2),
            transfer: Duration::from_secs(10),
            request: Duration::from_secs(5),
            tunnel_establish: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("timeouts.ping", self.ping),
            ("timeouts.transfer", self.transfer),
            ("timeouts.request", self.request),
            ("timeouts.tunnel_establish", self.tunnel_establish),
        ];
        for (name, value) in fields {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        BridgeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_receiver_port_range() {
        let config = BridgeConfig {
            receiver_port: 80,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PortOutOfRange { value: 80, .. })
        ));
    }

    #[test]
    fn test_bad_service_address() {
        let config = BridgeConfig {
            service_address: "tcp://no-port".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_public_address_must_be_bare() {
        let config = BridgeConfig {
            public_address_override: Some("http://me.example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let blank = BridgeConfig {
            public_address_override: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.public_address(), None);
        blank.validate().unwrap();
    }

    #[test]
    fn test_ssh_validated_only_when_enabled() {
        let mut config = BridgeConfig::default();
        config.ssh.port = "not-a-port".to_string();
        config.validate().unwrap();

        config.ssh.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = BridgeConfig::default();
        config.timeouts.transfer = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
