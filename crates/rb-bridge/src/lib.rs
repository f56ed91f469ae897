//! rb-bridge: Runtime for the render bridge
//!
//! Hands rendered images to a remote image-generation service over a
//! request/reply socket and receives the processed result back through an
//! HTTP callback. When the two machines cannot reach each other directly,
//! a pair of SSH port forwards carries both directions.
//!
//! The host application is assumed to be single-threaded: background
//! workers never touch host state, they queue [`tasks::CallbackTask`]s that
//! the host applies from its own polling step.

pub mod host;
pub mod receiver;
pub mod session;
pub mod tasks;
pub mod transport;
pub mod tunnel;

pub use host::BlockingBridge;
pub use receiver::{CallbackReceiver, ReceiverState};
pub use session::{Bridge, TransferJob};
pub use tasks::{
    task_queue, CallbackTask, HostError, ImageHost, TaskQueue, TaskSender, TickOutcome,
};
pub use transport::TransferOutcome;
pub use tunnel::{TunnelManager, TunnelSlot, TunnelStatus};
