//! render-bridge: Command-line host for the render bridge
//!
//! Supplies configuration from a TOML file and flags, and consumes
//! results by writing them into a directory.

pub mod commands;
pub mod host;
pub mod output;
