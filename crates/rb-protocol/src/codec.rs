//! MessagePack codec for multi-part requests and single-part replies
//!
//! Metadata and payload are never concatenated: the metadata map is the
//! first part and the raw payload, when present, is the second.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::{Metadata, Reply, ReplyStatus, Request, RequestType};

/// Maximum number of parts in a request (metadata + payload)
pub const MAX_PARTS: usize = 2;

/// Reply as it appears on the wire
#[derive(Debug, Serialize, Deserialize)]
struct WireReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Encode a request into its wire parts
pub fn encode_request(request: &Request) -> Result<Vec<Bytes>, ProtocolError> {
    let metadata = rmp_serde::to_vec_named(request.metadata())?;

    let mut parts = Vec::with_capacity(request.part_count());
    parts.push(Bytes::from(metadata));
    if let Some(payload) = request.payload() {
        parts.push(payload.clone());
    }

    Ok(parts)
}

/// Decode a request from its wire parts
pub fn decode_request(parts: &[Bytes]) -> Result<Request, ProtocolError> {
    let (first, rest) = parts.split_first().ok_or(ProtocolError::EmptyMessage)?;
    if parts.len() > MAX_PARTS {
        return Err(ProtocolError::TooManyParts {
            actual: parts.len(),
            max: MAX_PARTS,
        });
    }

    let metadata: Metadata = rmp_serde::from_slice(first)?;
    let kind = metadata
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::MissingRequestType)?
        .parse::<RequestType>()?;

    let payload = rest.first().cloned();
    Ok(Request::new(kind, metadata, payload))
}

/// Encode a reply
pub fn encode_reply(reply: &Reply) -> Result<Bytes, ProtocolError> {
    let wire = WireReply {
        status: reply.status.as_wire().map(str::to_string),
        detail: reply.detail.clone(),
    };
    Ok(Bytes::from(rmp_serde::to_vec_named(&wire)?))
}

/// Decode a reply.
///
/// A map without a `status` field decodes successfully with
/// [`ReplyStatus::Missing`]; anything that is not a map is a decode error.
pub fn decode_reply(bytes: &[u8]) -> Result<Reply, ProtocolError> {
    let wire: WireReply = rmp_serde::from_slice(bytes)?;
    Ok(Reply {
        status: ReplyStatus::from(wire.status),
        detail: wire.detail,
    })
}
