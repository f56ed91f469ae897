//! Core error types for the render bridge

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for bridge operations
///
/// Network and decode failures of a single exchange are not errors; the
/// transport reports them as outcomes. What remains here is what the
/// operator has to act on.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Callback receiver error
    #[error("Receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    /// The file to transfer could not be read
    #[error("Failed to read {}: {source}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A port field is not a number
    #[error("{field} '{value}' is not a valid port number")]
    InvalidPort { field: &'static str, value: String },

    /// A port is outside its allowed range
    #[error("{field} {value} is out of range ({min}-65535)")]
    PortOutOfRange {
        field: &'static str,
        value: u16,
        min: u16,
    },

    /// An address cannot be split into host and port
    #[error("Cannot parse address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Tunnel-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    /// SSH connection could not be established
    #[error("SSH connection to {address} failed: {message}")]
    Connect { address: String, message: String },

    /// Private key could not be loaded
    #[error("Failed to load private key {path}: {message}")]
    KeyLoad { path: String, message: String },

    /// SSH server rejected the credentials
    #[error("SSH authentication rejected for user '{0}'")]
    AuthRejected(String),

    /// SSH host key did not match the pinned fingerprint
    #[error("Host key mismatch: expected {expected}, got {actual}")]
    HostKeyRejected { expected: String, actual: String },

    /// Local forwarding port could not be bound
    #[error("Failed to bind local port {port}: {message}")]
    Bind { port: u16, message: String },

    /// SSH server refused the remote port forward
    #[error("Remote forward of port {0} rejected by the SSH server")]
    ForwardRejected(u16),

    /// Tunnel is in its sticky error state
    #[error("{0}")]
    Failed(String),

    /// Tunnel did not become active in time
    #[error("Tunnel did not become active within {0:?}")]
    Timeout(Duration),

    /// Other SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(String),
}

/// Callback receiver errors
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// The listening port could not be bound (usually already in use)
    #[error("Port {port} is unavailable: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Listener failed after binding
    #[error("Listener error: {0}")]
    Listener(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_specific() {
        let err = ConfigError::InvalidPort {
            field: "ssh.port",
            value: "twenty-two".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "ssh.port 'twenty-two' is not a valid port number"
        );

        let err = BridgeError::from(ConfigError::PortOutOfRange {
            field: "receiver_port",
            value: 80,
            min: 1024,
        });
        assert!(err.to_string().contains("receiver_port 80 is out of range"));
    }

    #[test]
    fn test_tunnel_error_display() {
        let err = TunnelError::Failed("SSH tunnel error (outbound): refused".to_string());
        assert_eq!(err.to_string(), "SSH tunnel error (outbound): refused");
    }
}
