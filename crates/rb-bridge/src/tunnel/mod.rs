//! SSH dual tunnel
//!
//! Two forwarders share one relay:
//!
//! - **Outbound** listens on `127.0.0.1:<service port>` and carries each
//!   connection over SSH to the remote service.
//! - **Inbound** asks the relay to listen on its own
//!   `127.0.0.1:<callback port>` and carries each connection back to the
//!   local callback receiver.
//!
//! A supervisor runs both and tears the pair down when either fails. The
//! failure is sticky until the manager is stopped and recreated.

mod forwarder;
mod manager;
mod settings;
mod slot;

pub use forwarder::{ForwardDirection, Forwarder, SshForwarder};
pub use manager::{TunnelManager, TunnelStatus, SUPERVISOR_POLL_INTERVAL, WORKER_JOIN_TIMEOUT};
pub use settings::{SshAuth, TunnelSettings};
pub use slot::TunnelSlot;
