//! Transport seam between the client state machine and the socket
//!
//! The client never touches a socket directly. It asks a [`Connector`] for a
//! fresh [`Transport`] on every attempt and drives it from a single task.

pub mod tungstenite;

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::protocol::close_code;

pub use self::tungstenite::TungsteniteConnector;

/// How a transport ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code reported by the peer or assigned locally
    pub code: u16,
    /// Close reason; empty when none was supplied
    pub reason: String,
    /// Whether the closing handshake completed
    pub was_clean: bool,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// The connection dropped without a close frame
    pub fn abnormal() -> Self {
        Self::new(close_code::ABNORMAL, "", false)
    }
}

/// Something the transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A data frame, text or binary
    Frame(Vec<u8>),
    /// The transport is closed; no further events follow
    Closed(CloseInfo),
    /// The transport failed; it must be considered dead
    Error(String),
}

/// A single open duplex connection
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame
    async fn send(&mut self, frame: String) -> ClientResult<()>;

    /// Wait for the next event
    ///
    /// Must be cancel-safe: the client polls it inside `tokio::select!`.
    async fn next_event(&mut self) -> TransportEvent;

    /// Start the closing handshake
    async fn close(&mut self, code: u16, reason: &str) -> ClientResult<()>;
}

/// Opens transports to a target address
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the transport-level handshake
    async fn connect(&self, url: &str) -> ClientResult<Box<dyn Transport>>;
}
