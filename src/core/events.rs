//! Event surface of the connection client
//!
//! Listeners register against one of a fixed set of event kinds and get back
//! a [`ListenerId`]. Every registration made by a consumer is expected to be
//! paired with an [`ListenerRegistry::off`] call when that consumer goes away,
//! because the client outlives many logical connections.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

/// Identifier handed out for every registered listener
pub type ListenerId = Uuid;

/// The events a client can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientEventKind {
    /// A transport attempt is about to start
    Connecting,
    /// The session identity has been assigned
    Connect,
    /// A non-`init` frame arrived
    Message,
    /// The transport closed
    Close,
    /// A transport failure or dropped send
    Error,
}

impl fmt::Display for ClientEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connect => "connect",
            Self::Message => "message",
            Self::Close => "close",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// An event raised by the client, with its payload
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connecting,
    Connect,
    Message {
        channel: String,
        sender: Option<String>,
        payload: Option<Value>,
    },
    Close {
        reason: String,
        code: u16,
        was_clean: bool,
    },
    Error {
        message: String,
    },
}

impl ClientEvent {
    /// The kind this event is dispatched under
    pub fn kind(&self) -> ClientEventKind {
        match self {
            Self::Connecting => ClientEventKind::Connecting,
            Self::Connect => ClientEventKind::Connect,
            Self::Message { .. } => ClientEventKind::Message,
            Self::Close { .. } => ClientEventKind::Close,
            Self::Error { .. } => ClientEventKind::Error,
        }
    }
}

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct Entry {
    id: ListenerId,
    kind: ClientEventKind,
    once: bool,
    listener: Listener,
}

/// Ordered listener storage with on / once / off / emit semantics
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert<F>(&self, kind: ClientEventKind, once: bool, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.entries().push(Entry {
            id,
            kind,
            once,
            listener: Arc::new(listener),
        });
        trace!(listener_id = %id, event = %kind, once, "Listener registered");
        id
    }

    /// Register a listener for every future event of `kind`
    pub fn on<F>(&self, kind: ClientEventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.insert(kind, false, listener)
    }

    /// Register a listener for the next event of `kind` only
    pub fn once<F>(&self, kind: ClientEventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.insert(kind, true, listener)
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if removed {
            trace!(listener_id = %id, "Listener removed");
        }
        removed
    }

    /// Remove every listener
    pub fn remove_all(&self) {
        self.entries().clear();
    }

    /// Number of listeners registered for `kind`
    pub fn listener_count(&self, kind: ClientEventKind) -> usize {
        self.entries().iter().filter(|entry| entry.kind == kind).count()
    }

    /// Invoke every listener registered for the event's kind, in registration order
    ///
    /// Single-shot listeners are removed before any listener runs, so a
    /// listener may freely register or remove listeners. Returns the number of
    /// listeners invoked.
    pub fn emit(&self, event: &ClientEvent) -> usize {
        self.emit_while(event, || true)
    }

    /// Like [`ListenerRegistry::emit`], but checks `live` before each listener
    ///
    /// Dispatch stops as soon as `live` returns false, so a listener that tears
    /// down the emitter silences the listeners after it.
    pub fn emit_while<L>(&self, event: &ClientEvent, live: L) -> usize
    where
        L: Fn() -> bool,
    {
        let kind = event.kind();
        let listeners: Vec<Listener> = {
            let mut entries = self.entries();
            let selected = entries
                .iter()
                .filter(|entry| entry.kind == kind)
                .map(|entry| Arc::clone(&entry.listener))
                .collect();
            entries.retain(|entry| !(entry.once && entry.kind == kind));
            selected
        };

        let mut delivered = 0;
        for listener in &listeners {
            if !live() {
                trace!(kind = %kind, skipped = listeners.len() - delivered, "Dispatch halted");
                break;
            }
            listener(event);
            delivered += 1;
        }
        delivered
    }
}
