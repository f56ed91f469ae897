//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Loopback host used for every tunneled connection
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// A network address a component connects to or listens on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address (IPv6 without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on the local loopback interface
    pub fn loopback(port: u16) -> Self {
        Self::new(LOOPBACK_HOST, port)
    }

    /// Strip a `scheme://` prefix, if any
    pub fn strip_scheme(address: &str) -> &str {
        match address.find("://") {
            Some(idx) => &address[idx + 3..],
            None => address,
        }
    }

    /// Parse `host:port`, optionally prefixed with a scheme such as `tcp://`
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let rest = Self::strip_scheme(address.trim()).trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port is not a number between 0 and 65535"))?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// How the remote service is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Connect straight to the service
    Direct(Endpoint),
    /// Connect to a locally bound forwarding port that relays to `remote`
    Tunneled {
        /// The service as seen from the SSH relay
        remote: Endpoint,
        /// Port bound on the local loopback interface
        local_port: u16,
    },
}

impl Route {
    /// Address a socket should actually connect to.
    ///
    /// A tunneled route always resolves to `127.0.0.1:<local_port>`, never
    /// to the remote host.
    pub fn connect_endpoint(&self) -> Endpoint {
        match self {
            Route::Direct(endpoint) => endpoint.clone(),
            Route::Tunneled { local_port, .. } => Endpoint::loopback(*local_port),
        }
    }

    /// Whether this route goes through the tunnel
    pub fn is_tunneled(&self) -> bool {
        matches!(self, Route::Tunneled { .. })
    }
}

/// Connection status of the bridge, driven by ping outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    /// Not tested yet
    #[default]
    Disconnected,
    /// Last ping got a reply
    Connected,
    /// Last ping failed
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Failed => write!(f, "failed"),
        }
    }
}
