//! rb-protocol: Wire messages for the render bridge
//!
//! This crate defines the request/reply messages exchanged between the
//! bridge and the remote image-generation service, and the MessagePack
//! encoding used to carry them over a multi-part request socket.

pub mod codec;
pub mod error;
pub mod message;
pub mod passes;

pub use codec::{decode_reply, decode_request, encode_reply, encode_request, MAX_PARTS};
pub use error::ProtocolError;
pub use message::{
    Metadata, RenderType, Reply, ReplyStatus, Request, RequestType, ReturnInfo, TransferMetadata,
};
pub use passes::{ChannelMapBuilder, RenderPass};
