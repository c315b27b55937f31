//! Connection state as seen by consumers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Native state of the current transport attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportPhase {
    /// No attempt has been made yet
    Idle,
    /// Handshake in progress
    Connecting,
    /// Handshake completed
    Open,
    /// Close requested locally, waiting for the peer
    Closing,
    /// Transport gone
    Closed,
}

/// Derived connection state
///
/// The client only reports `Open` once the transport is open *and* the peer
/// has assigned a session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub(crate) fn derive(phase: TransportPhase, has_identity: bool) -> Self {
        match phase {
            TransportPhase::Open if has_identity => Self::Open,
            TransportPhase::Open | TransportPhase::Connecting => Self::Connecting,
            TransportPhase::Closing => Self::Closing,
            TransportPhase::Idle | TransportPhase::Closed => Self::Closed,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}
