//! Message types for the render bridge protocol
//!
//! A request is sent as one or two parts on a request socket:
//!
//! 1. A MessagePack map (the metadata) that always carries a `type` field
//! 2. Optionally, the raw image bytes, kept as a separate part so the
//!    service can decode the metadata without touching the payload
//!
//! The service answers every request with a single MessagePack map
//! carrying a `status` field and an optional detail string.
//!
//! # Message Flow
//!
//! 1. Bridge sends `ping`, service replies with anything (receipt is enough)
//! 2. Bridge sends `render_and_return` with the image, service replies `ok`
//! 3. Later, the service POSTs the processed image to the callback address
//!    named in `return_info`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Arbitrary metadata mapping carried in the first message part
pub type Metadata = Map<String, Value>;

/// Request type, carried in the `type` field of the metadata part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Liveness check; the reply content is ignored
    Ping,
    /// Image hand-off with a callback for the processed result
    RenderAndReturn,
}

impl RequestType {
    /// Wire name of this request type
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Ping => "ping",
            RequestType::RenderAndReturn => "render_and_return",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(RequestType::Ping),
            "render_and_return" => Ok(RequestType::RenderAndReturn),
            other => Err(ProtocolError::UnknownRequestType(other.to_string())),
        }
    }
}

/// How the transferred image was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderType {
    /// A regular single-layer render (PNG/JPEG)
    Standard,
    /// A multilayer OpenEXR render, usually with a channel map
    MultilayerExr,
    /// An existing image sent as-is
    DirectImage,
}

impl RenderType {
    /// Wire name of this render type
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderType::Standard => "standard",
            RenderType::MultilayerExr => "multilayer_exr",
            RenderType::DirectImage => "direct_image",
        }
    }
}

impl fmt::Display for RenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(RenderType::Standard),
            "multilayer_exr" | "exr" => Ok(RenderType::MultilayerExr),
            "direct_image" | "image" => Ok(RenderType::DirectImage),
            other => Err(format!("unknown render type '{}'", other)),
        }
    }
}

/// Where the service should deliver the processed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnInfo {
    /// HTTP address of the callback receiver, e.g. `http://127.0.0.1:5556`
    pub blender_server_address: String,
    /// Host-side image the result should replace
    pub image_datablock_name: String,
}

/// Typed view of the metadata of a `render_and_return` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMetadata {
    /// Base name of the transferred file (never a full path)
    pub filename: String,
    /// Callback routing
    pub return_info: ReturnInfo,
    /// How the image was produced
    pub render_type: RenderType,
    /// Logical channel name -> source channel name, for multilayer EXR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_map: Option<BTreeMap<String, String>>,
    /// Additional caller-supplied fields
    #[serde(flatten)]
    pub extra: Metadata,
}

impl TransferMetadata {
    /// Create transfer metadata without a channel map
    pub fn new(
        filename: impl Into<String>,
        return_info: ReturnInfo,
        render_type: RenderType,
    ) -> Self {
        Self {
            filename: filename.into(),
            return_info,
            render_type,
            channel_map: None,
            extra: Metadata::new(),
        }
    }

    /// Attach a channel map; an empty map is omitted from the wire
    pub fn with_channel_map(mut self, channel_map: BTreeMap<String, String>) -> Self {
        self.channel_map = if channel_map.is_empty() {
            None
        } else {
            Some(channel_map)
        };
        self
    }

    /// Attach an extra field. Typed fields win over extras with the same key.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Flatten into the untyped metadata mapping (without the `type` field)
    pub fn into_metadata(self) -> Metadata {
        let mut map = self.extra;
        map.insert("filename".to_string(), Value::String(self.filename));

        let mut return_info = Map::new();
        return_info.insert(
            "blender_server_address".to_string(),
            Value::String(self.return_info.blender_server_address),
        );
        return_info.insert(
            "image_datablock_name".to_string(),
            Value::String(self.return_info.image_datablock_name),
        );
        map.insert("return_info".to_string(), Value::Object(return_info));

        map.insert(
            "render_type".to_string(),
            Value::String(self.render_type.as_str().to_string()),
        );

        if let Some(channel_map) = self.channel_map {
            let channels = channel_map
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            map.insert("channel_map".to_string(), Value::Object(channels));
        }

        map
    }

    /// Parse the typed view back out of a request's metadata
    pub fn from_metadata(metadata: &Metadata) -> Result<Self, ProtocolError> {
        let mut fields = metadata.clone();
        fields.remove("type");
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

/// A request to the remote service
///
/// The metadata always contains a `type` field matching [`Request::kind`].
/// A payload is only present for transfers that actually carry bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    kind: RequestType,
    metadata: Metadata,
    payload: Option<Bytes>,
}

impl Request {
    /// Minimal liveness request: `{"type": "ping"}`
    pub fn ping() -> Self {
        Self::new(RequestType::Ping, Metadata::new(), None)
    }

    /// Image transfer with typed metadata
    pub fn transfer(metadata: TransferMetadata, payload: Option<Bytes>) -> Self {
        Self::new(RequestType::RenderAndReturn, metadata.into_metadata(), payload)
    }

    /// Build a request from untyped metadata.
    ///
    /// The `type` field is set from `kind`, overriding any caller value.
    /// Empty payloads, and any payload on a ping, are dropped.
    pub fn new(kind: RequestType, mut metadata: Metadata, payload: Option<Bytes>) -> Self {
        metadata.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        let payload = match kind {
            RequestType::Ping => None,
            RequestType::RenderAndReturn => payload.filter(|p| !p.is_empty()),
        };
        Self {
            kind,
            metadata,
            payload,
        }
    }

    /// Request type
    pub fn kind(&self) -> RequestType {
        self.kind
    }

    /// Metadata mapping, including the `type` field
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Binary payload, if any
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Number of parts this request occupies on the wire
    pub fn part_count(&self) -> usize {
        if self.payload.is_some() {
            2
        } else {
            1
        }
    }

    /// Split into metadata and payload
    pub fn into_parts(self) -> (Metadata, Option<Bytes>) {
        (self.metadata, self.payload)
    }
}

/// Reply status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    /// `status == "ok"`
    Ok,
    /// Any other status string
    Other(String),
    /// No status field at all
    Missing,
}

impl ReplyStatus {
    /// Status as it appears on the wire, if any
    pub fn as_wire(&self) -> Option<&str> {
        match self {
            ReplyStatus::Ok => Some("ok"),
            ReplyStatus::Other(s) => Some(s),
            ReplyStatus::Missing => None,
        }
    }
}

impl From<Option<String>> for ReplyStatus {
    fn from(status: Option<String>) -> Self {
        match status.as_deref() {
            Some("ok") => ReplyStatus::Ok,
            Some(_) => ReplyStatus::Other(status.unwrap_or_default()),
            None => ReplyStatus::Missing,
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyStatus::Ok => write!(f, "ok"),
            ReplyStatus::Other(s) => write!(f, "{}", s),
            ReplyStatus::Missing => write!(f, "<missing>"),
        }
    }
}

/// Reply from the remote service
///
/// Anything other than `status == "ok"` is a failure, regardless of
/// whether the exchange itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply status
    pub status: ReplyStatus,
    /// Optional human-readable detail
    pub detail: Option<String>,
}

impl Reply {
    /// Successful reply
    pub fn ok() -> Self {
        Self {
            status: ReplyStatus::Ok,
            detail: None,
        }
    }

    /// Error reply with a detail message
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Other("error".to_string()),
            detail: Some(detail.into()),
        }
    }

    /// Whether the service accepted the request
    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}
