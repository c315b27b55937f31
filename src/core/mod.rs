//! Core building blocks of the connection client

mod events;
mod state;

pub use events::{ClientEvent, ClientEventKind, ListenerId, ListenerRegistry};
pub use state::ReadyState;
pub(crate) use state::TransportPhase;
