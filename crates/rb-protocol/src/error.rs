//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Metadata could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A message part is not valid MessagePack for the expected shape
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A message arrived with no parts at all
    #[error("Empty message")]
    EmptyMessage,

    /// A request carried more parts than metadata + payload
    #[error("Unexpected message parts: expected at most {max}, got {actual}")]
    TooManyParts { actual: usize, max: usize },

    /// Metadata has no `type` field
    #[error("Missing request type")]
    MissingRequestType,

    /// Metadata `type` field is not a known request type
    #[error("Unknown request type: {0}")]
    UnknownRequestType(String),

    /// Metadata does not have the shape of a transfer request
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),
}
