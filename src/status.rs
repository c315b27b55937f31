//! Three-state connection status for display surfaces

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::client::WsClient;
use crate::core::{ClientEvent, ClientEventKind, ListenerId, ReadyState};
use crate::protocol::close_code;

/// Connection status shown to a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Failed,
}

impl From<ReadyState> for ConnectionStatus {
    fn from(state: ReadyState) -> Self {
        match state {
            ReadyState::Open => Self::Connected,
            ReadyState::Closed => Self::Failed,
            ReadyState::Connecting | ReadyState::Closing => Self::Connecting,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Follows a client's events and publishes its [`ConnectionStatus`]
///
/// Only a close with "Try Again Later" counts as failed; any other close
/// leaves the status untouched until the next attempt starts. Listeners are
/// removed on [`StatusTracker::detach`] or drop.
pub struct StatusTracker {
    client: WsClient,
    listeners: Vec<ListenerId>,
    status: watch::Receiver<ConnectionStatus>,
}

impl StatusTracker {
    /// Start tracking `client`, seeded from its current ready state
    pub fn attach(client: &WsClient) -> Self {
        let (tx, rx) = watch::channel(ConnectionStatus::from(client.ready_state()));

        let connecting = tx.clone();
        let connected = tx.clone();
        let failed = tx;
        let listeners = vec![
            client.on(ClientEventKind::Connecting, move |_| {
                connecting.send_replace(ConnectionStatus::Connecting);
            }),
            client.on(ClientEventKind::Connect, move |_| {
                connected.send_replace(ConnectionStatus::Connected);
            }),
            client.on(ClientEventKind::Close, move |event| {
                if let ClientEvent::Close { code, .. } = event {
                    if *code == close_code::TRY_AGAIN_LATER {
                        failed.send_replace(ConnectionStatus::Failed);
                    }
                }
            }),
        ];

        Self {
            client: client.clone(),
            listeners,
            status: rx,
        }
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Stop tracking; the last status stays readable
    pub fn detach(&mut self) {
        for id in self.listeners.drain(..) {
            self.client.off(id);
        }
        debug!(url = %self.client.url(), "Status tracker detached");
    }
}

impl Drop for StatusTracker {
    fn drop(&mut self) {
        if !self.listeners.is_empty() {
            self.detach();
        }
    }
}
