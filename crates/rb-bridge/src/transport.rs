//! Request/reply transport to the image service
//!
//! Every call opens its own REQ socket, performs exactly one
//! request/reply exchange and closes the socket on every exit path. The
//! socket never leaves [`exchange`], so a second request on the same
//! socket cannot be issued.
//!
//! Failures never escape as errors from [`ping`], [`transfer`] or
//! [`send`]: timeouts, connection failures and malformed replies all
//! become a negative outcome.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqError, ZmqMessage};

use rb_protocol::{
    decode_reply, encode_request, Metadata, ProtocolError, Reply, ReplyStatus, Request,
    RequestType,
};

/// Scheme prepended to addresses given without one
pub const DEFAULT_SCHEME: &str = "tcp://";

/// Errors from a single request/reply exchange
#[derive(Debug, Error)]
pub enum TransportError {
    /// No reply within the timeout
    #[error("Request to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// The socket could not connect
    #[error("Connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: ZmqError,
    },

    /// Sending or receiving failed
    #[error("Exchange with {address} failed: {source}")]
    Socket {
        address: String,
        #[source]
        source: ZmqError,
    },

    /// The reply could not be decoded
    #[error("Malformed reply from {address}: {source}")]
    Decode {
        address: String,
        #[source]
        source: ProtocolError,
    },

    /// The request could not be encoded
    #[error("Failed to encode request: {0}")]
    Encode(#[from] ProtocolError),
}

/// Result of a transfer, as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The service replied with `status == "ok"`
    Delivered,
    /// The service replied with any other status (or none)
    Rejected {
        status: ReplyStatus,
        detail: Option<String>,
    },
    /// No reply within the timeout
    TimedOut,
    /// Connection or socket failure
    Unreachable(String),
    /// The request or the reply could not be encoded/decoded
    Malformed(String),
}

impl TransferOutcome {
    /// Whether the transfer succeeded
    pub fn is_delivered(&self) -> bool {
        matches!(self, TransferOutcome::Delivered)
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Delivered => write!(f, "Data sent to the service"),
            TransferOutcome::Rejected { status, detail } => {
                write!(f, "Service rejected the request (status: {})", status)?;
                if let Some(detail) = detail {
                    write!(f, ": {}", detail)?;
                }
                Ok(())
            }
            TransferOutcome::TimedOut => write!(f, "Service did not reply in time"),
            TransferOutcome::Unreachable(reason) => write!(f, "Service unreachable: {}", reason),
            TransferOutcome::Malformed(reason) => {
                write!(f, "Service sent a malformed reply: {}", reason)
            }
        }
    }
}

impl From<TransportError> for TransferOutcome {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => TransferOutcome::TimedOut,
            TransportError::Connect { .. } | TransportError::Socket { .. } => {
                TransferOutcome::Unreachable(err.to_string())
            }
            TransportError::Decode { .. } | TransportError::Encode(_) => {
                TransferOutcome::Malformed(err.to_string())
            }
        }
    }
}

/// Prepend the default scheme when the address has none
pub fn normalize_address(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("{}{}", DEFAULT_SCHEME, address)
    }
}

/// Send a ping and report whether any reply arrived within `timeout`.
///
/// The reply content is not inspected.
pub async fn ping(address: &str, timeout: Duration) -> bool {
    let address = normalize_address(address);
    tracing::info!("Pinging {}...", address);

    let parts = match encode_request(&Request::ping()) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!("Failed to encode ping: {}", e);
            return false;
        }
    };

    match exchange(&address, parts, timeout).await {
        Ok(_) => {
            tracing::info!("Ping successful");
            true
        }
        Err(TransportError::Timeout { .. }) => {
            tracing::warn!("Ping timed out to {}", address);
            false
        }
        Err(e) => {
            tracing::warn!("Ping failed: {}", e);
            false
        }
    }
}

/// Send `metadata` (and `payload`, when non-empty) as a transfer request.
///
/// Returns true only if the decoded reply has `status == "ok"`.
pub async fn transfer(
    address: &str,
    metadata: Metadata,
    payload: Option<Bytes>,
    timeout: Duration,
) -> bool {
    let request = Request::new(RequestType::RenderAndReturn, metadata, payload);
    send(address, request, timeout).await.is_delivered()
}

/// Send a request and classify the result
pub async fn send(address: &str, request: Request, timeout: Duration) -> TransferOutcome {
    match self::request(address, request, timeout).await {
        Ok(reply) if reply.is_ok() => TransferOutcome::Delivered,
        Ok(reply) => {
            tracing::warn!("Received unexpected reply: {:?}", reply);
            TransferOutcome::Rejected {
                status: reply.status,
                detail: reply.detail,
            }
        }
        Err(e) => {
            match &e {
                TransportError::Timeout { address, .. } => {
                    tracing::warn!("Request to {} timed out", address)
                }
                TransportError::Decode { .. } => tracing::error!("{}", e),
                _ => tracing::warn!("{}", e),
            }
            e.into()
        }
    }
}

/// Send a request and return the decoded reply
pub async fn request(
    address: &str,
    request: Request,
    timeout: Duration,
) -> Result<Reply, TransportError> {
    let address = normalize_address(address);

    tracing::debug!("Sending {} request to {}", request.kind(), address);
    if let Some(payload) = request.payload() {
        tracing::info!("Attaching payload ({} bytes)", payload.len());
    }

    let parts = encode_request(&request)?;
    let reply = exchange(&address, parts, timeout).await?;

    let first = reply.get(0).ok_or_else(|| TransportError::Decode {
        address: address.clone(),
        source: ProtocolError::EmptyMessage,
    })?;

    decode_reply(first).map_err(|source| TransportError::Decode { address, source })
}

/// One request/reply exchange on a fresh socket.
///
/// The socket is created here and closed here regardless of the outcome.
async fn exchange(
    address: &str,
    parts: Vec<Bytes>,
    timeout: Duration,
) -> Result<ZmqMessage, TransportError> {
    let mut socket = ReqSocket::new();
    tracing::debug!("Connecting to {}...", address);

    let result = send_and_receive(&mut socket, address, parts, timeout).await;

    let errors = socket.close().await;
    if !errors.is_empty() {
        tracing::debug!("Errors while closing socket to {}: {:?}", address, errors);
    }
    tracing::debug!("Closed socket to {}", address);

    result
}

async fn send_and_receive(
    socket: &mut ReqSocket,
    address: &str,
    parts: Vec<Bytes>,
    timeout: Duration,
) -> Result<ZmqMessage, TransportError> {
    let message = into_message(parts)?;
    let timed_out = || TransportError::Timeout {
        address: address.to_string(),
        timeout,
    };

    // Send phase: connect + send share the send timeout
    tokio::time::timeout(timeout, async {
        socket
            .connect(address)
            .await
            .map_err(|source| TransportError::Connect {
                address: address.to_string(),
                source,
            })?;
        socket
            .send(message)
            .await
            .map_err(|source| TransportError::Socket {
                address: address.to_string(),
                source,
            })
    })
    .await
    .map_err(|_| timed_out())??;

    // Receive phase
    tokio::time::timeout(timeout, socket.recv())
        .await
        .map_err(|_| timed_out())?
        .map_err(|source| TransportError::Socket {
            address: address.to_string(),
            source,
        })
}

fn into_message(parts: Vec<Bytes>) -> Result<ZmqMessage, TransportError> {
    let mut parts = parts.into_iter();
    let first = parts
        .next()
        .ok_or(TransportError::Encode(ProtocolError::EmptyMessage))?;

    let mut message = ZmqMessage::from(first);
    for part in parts {
        message.push_back(part);
    }
    Ok(message)
}
