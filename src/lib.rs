pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod recovery;
pub mod status;
pub mod websocket;


// Re-export core components
pub use crate::client::{WeakClient, WsClient};
pub use crate::config::{ClientOptions, Config};
pub use crate::core::{ClientEvent, ClientEventKind, ListenerId, ReadyState};
pub use crate::error::{ClientError, ClientResult, ErrorCode};
pub use crate::protocol::{channels, Envelope};
pub use crate::status::{ConnectionStatus, StatusTracker};
pub use crate::websocket::{Connector, Transport, TungsteniteConnector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
