//! rb-core: Core types and configuration for the render bridge
//!
//! This crate provides the endpoint and status types, the immutable
//! connection configuration and the error taxonomy shared by the bridge
//! runtime and the CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::BridgeConfig;
pub use error::{BridgeError, ConfigError, ReceiverError, TunnelError};
pub use types::{ConnectionStatus, Endpoint, Route};
