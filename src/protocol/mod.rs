//! Wire format shared with the game server
//!
//! A frame is a JSON array of two or three elements:
//! `[channel, sender]` or `[channel, sender, payload]`. The server assigns the
//! session identity by sending a single frame on the reserved `init` channel
//! right after the socket opens.

pub mod channels;

use serde_json::Value;
use thiserror::Error;

/// Reserved channel carrying the session identity
pub const INIT_CHANNEL: &str = "init";

/// Close codes with a defined meaning for the client
pub mod close_code {
    /// Normal closure, never retried
    pub const NORMAL: u16 = 1000;
    /// Connection dropped without a close frame
    pub const ABNORMAL: u16 = 1006;
    /// Retries exhausted or rejected by policy, never retried
    pub const TRY_AGAIN_LATER: u16 = 1013;
    /// Assigned locally when the handshake does not complete in time
    pub const HANDSHAKE_TIMEOUT: u16 = 4000;
    /// Highest code still eligible for an automatic reconnect
    pub const RECONNECT_CEILING: u16 = 4000;
}

/// Human-readable name of a well-known close code
pub fn close_reason(code: u16) -> &'static str {
    match code {
        1000 => "Normal Closure",
        1001 => "Going Away",
        1002 => "Protocol Error",
        1003 => "Unsupported Data",
        1004 => "(For future)",
        1005 => "No Status Received",
        1006 => "Abnormal Closure",
        1007 => "Invalid frame payload data",
        1008 => "Policy Violation",
        1009 => "Message too big",
        1010 => "Missing Extension",
        1011 => "Internal Error",
        1012 => "Service Restart",
        1013 => "Try Again Later",
        1014 => "Bad Gateway",
        1015 => "TLS Handshake",
        _ => "UNKNOWN",
    }
}

/// Resolve the reason reported with a close event
///
/// An explicit reason string wins; otherwise the code table is consulted.
pub fn describe_close(code: u16, reason: &str) -> String {
    if reason.is_empty() {
        close_reason(code).to_string()
    } else {
        reason.to_string()
    }
}

/// Errors raised while decoding an inbound frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("frame must be an array of 2 or 3 elements")]
    Shape,

    #[error("channel must be a string")]
    Channel,

    #[error("sender must be a string or null")]
    Sender,
}

/// A single channel-tagged message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Logical topic of the message, opaque to the client
    pub channel: String,
    /// Identity of the sending session, if any
    pub sender: Option<String>,
    /// Message body
    pub payload: Option<Value>,
}

impl Envelope {
    /// Create an envelope without a payload
    pub fn new(channel: impl Into<String>, sender: Option<String>) -> Self {
        Self {
            channel: channel.into(),
            sender,
            payload: None,
        }
    }

    /// Attach a payload; `null` is treated as no payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = match payload {
            Value::Null => None,
            value => Some(value),
        };
        self
    }

    /// Whether this frame assigns the session identity
    pub fn is_init(&self) -> bool {
        self.channel == INIT_CHANNEL
    }

    /// Serialize to the textual wire form
    pub fn encode(&self) -> String {
        let mut items = Vec::with_capacity(3);
        items.push(Value::String(self.channel.clone()));
        items.push(match &self.sender {
            Some(sender) => Value::String(sender.clone()),
            None => Value::Null,
        });
        match &self.payload {
            Some(Value::Null) | None => {}
            Some(payload) => items.push(payload.clone()),
        }
        Value::Array(items).to_string()
    }

    /// Decode a raw frame, text or binary
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(data).map_err(|_| FrameError::NotUtf8)?;
        Self::decode_str(text)
    }

    /// Decode a textual frame
    pub fn decode_str(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Json(e.to_string()))?;

        let mut items = match value {
            Value::Array(items) if items.len() == 2 || items.len() == 3 => items.into_iter(),
            _ => return Err(FrameError::Shape),
        };

        let channel = match items.next() {
            Some(Value::String(channel)) => channel,
            _ => return Err(FrameError::Channel),
        };
        let sender = match items.next() {
            Some(Value::String(sender)) => Some(sender),
            Some(Value::Null) => None,
            _ => return Err(FrameError::Sender),
        };

        Ok(Self {
            channel,
            sender,
            payload: items.next(),
        })
    }
}

/// Whether a close with this code should trigger an automatic reconnect
pub fn is_reconnectable(code: u16) -> bool {
    code > close_code::NORMAL
        && code <= close_code::RECONNECT_CEILING
        && code != close_code::TRY_AGAIN_LATER
}
