//! MOO/1 messaging: framing, request multiplexing and subscription tables.
//!
//! Everything here is transport-agnostic. Frames leave through a
//! [`FrameSink`] and arrive through a [`ChunkSource`]; the session module
//! plugs a WebSocket into both.

pub mod frame;
pub mod requests;
pub mod subscriptions;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use frame::{ChunkSource, Frame, FrameReader};
pub use requests::{Completion, RequestMultiplexer};
pub use subscriptions::{ContinuationTable, SubscriptionKey, SubscriptionRegistry};

use crate::protocol_constants::DEFAULT_CONTENT_TYPE;

/// Errors raised by the messaging layer and by session-level requests.
#[derive(Debug, Error)]
pub enum MooError {
    /// The WebSocket failed.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// No transport became available within the send wait timeout.
    #[error("not connected")]
    NotConnected,

    /// The session was closed while the call was in flight.
    #[error("cancelled")]
    Cancelled,

    /// The transport was replaced before the reply arrived, or before a
    /// frame built for it could be sent.
    #[error("session reset before reply")]
    SessionReset,

    /// A complete frame with an unusable header.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame announced more bytes than the reader accepts. The stream
    /// cannot be resynchronized after this.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The stream ended inside a frame.
    #[error("stream ended inside a frame")]
    Truncated,

    /// A body did not match the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The far end answered with a reply name other than the one expected.
    #[error("expected reply '{expected}', got '{actual}'")]
    UnexpectedReply {
        /// Reply name the caller accepts.
        expected: String,
        /// Reply name that arrived.
        actual: String,
    },

    /// No handler is registered for the service.
    #[error("no handler registered for '{0}'")]
    NoHandler(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Type
// ─────────────────────────────────────────────────────────────────────────────

/// Verb on the first line of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Request,
    Complete,
    Continue,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Complete => "COMPLETE",
            Self::Continue => "CONTINUE",
        }
    }

    pub fn parse(verb: &str) -> Option<Self> {
        match verb {
            "REQUEST" => Some(Self::Request),
            "COMPLETE" => Some(Self::Complete),
            "CONTINUE" => Some(Self::Continue),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Body
// ─────────────────────────────────────────────────────────────────────────────

/// Frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    #[default]
    Empty,
    /// UTF-8 text, normally JSON.
    Text(String),
    /// Opaque bytes such as image data.
    Binary(Bytes),
}

impl Body {
    /// Serializes `value` as a JSON text body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, MooError> {
        Ok(Self::Text(serde_json::to_string(value)?))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            Self::Binary(b) => b.is_empty(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Content type used when the sender does not name one.
    pub fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Text(_) => Some(DEFAULT_CONTENT_TYPE),
            Self::Binary(_) => Some("application/octet-stream"),
        }
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Replies
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded frame as delivered to waiters and handlers.
pub type Reply = Frame;

/// How a caller wants a reply body decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// The raw body bytes.
    RawBytes,
    /// Only whether the reply name was `Success`.
    Ack,
    /// The body parsed as JSON into the caller's type.
    Json,
}

/// A reply decoded according to a [`ResultKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyValue<T> {
    Bytes(Bytes),
    Ack(bool),
    Json(T),
}

impl Frame {
    /// Whether the reply name is `Success`.
    pub fn is_success(&self) -> bool {
        self.name == "Success"
    }

    /// Parses the body as JSON. An empty body parses as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MooError> {
        if self.body.is_empty() {
            return Ok(serde_json::from_str("null")?);
        }
        Ok(serde_json::from_slice(self.body.as_bytes())?)
    }

    /// Body bytes regardless of how the frame was decoded.
    pub fn bytes(&self) -> Bytes {
        match &self.body {
            Body::Empty => Bytes::new(),
            Body::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Body::Binary(b) => b.clone(),
        }
    }

    /// Decodes the reply as selected by `kind`.
    pub fn decode<T: DeserializeOwned>(&self, kind: ResultKind) -> Result<ReplyValue<T>, MooError> {
        Ok(match kind {
            ResultKind::RawBytes => ReplyValue::Bytes(self.bytes()),
            ResultKind::Ack => ReplyValue::Ack(self.is_success()),
            ResultKind::Json => ReplyValue::Json(self.json()?),
        })
    }

    /// Fails with [`MooError::UnexpectedReply`] unless the reply name is `expected`.
    pub fn expect_name(&self, expected: &str) -> Result<&Self, MooError> {
        if self.name == expected {
            Ok(self)
        } else {
            Err(MooError::UnexpectedReply {
                expected: expected.to_string(),
                actual: self.name.clone(),
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Seams
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound path for encoded frames.
///
/// Implementations must write each frame atomically.
///
/// Request ids belong to one connection. Sinks that can be reconnected
/// report a different [`generation`](FrameSink::generation) for each
/// transport, and [`send_frame_on`](FrameSink::send_frame_on) refuses frames
/// built for an earlier one.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Identifies the transport frames currently go out on.
    fn generation(&self) -> u64 {
        0
    }

    /// Sends `frame` only if the transport is still `generation`.
    async fn send_frame_on(&self, generation: u64, frame: Frame) -> Result<(), MooError> {
        if generation != self.generation() {
            return Err(MooError::SessionReset);
        }
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), MooError>;
}

/// Receives replies for a request id: one-shot callbacks and subscription
/// continuations.
///
/// Handlers run on the receive task. They may send frames but must not wait
/// for a reply to a request, since the receive task is what delivers it.
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    async fn on_reply(&self, reply: &Reply) -> Result<(), MooError>;
}

#[async_trait]
impl<F> ReplyHandler for F
where
    F: Fn(&Reply) -> Result<(), MooError> + Send + Sync,
{
    async fn on_reply(&self, reply: &Reply) -> Result<(), MooError> {
        self(reply)
    }
}
