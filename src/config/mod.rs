use anyhow::Result;
use http::Uri;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{self, ClientResult};

// Default configuration values
const DEFAULT_SERVER_URL: &str = "ws://localhost:8080";
const DEFAULT_PING_INTERVAL_MS: u64 = 3000;
const DEFAULT_TIMEOUT_INTERVAL_MS: u64 = 2000;
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_RECONNECT_INTERVAL_MS: u64 = 30000;
const DEFAULT_RECONNECT_DECAY: f64 = 1.5;

/// Lower bound for the heartbeat period
pub const MIN_PING_INTERVAL_MS: u64 = 10;

/// Main configuration struct for the client binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address of the game server
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Connection client options
    #[serde(default)]
    pub client: ClientOptions,
}

/// Options recognized by the connection client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Heartbeat period in milliseconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
    /// Maximum time to wait for the transport handshake, in milliseconds
    #[serde(default = "default_timeout_interval")]
    pub timeout_interval_ms: u64,
    /// Base delay before a reconnect attempt, in milliseconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    /// Ceiling of the reconnect delay, in milliseconds
    #[serde(default = "default_max_reconnect_interval")]
    pub max_reconnect_interval_ms: u64,
    /// Growth factor of the reconnect delay per attempt
    #[serde(default = "default_reconnect_decay")]
    pub reconnect_decay: f64,
    /// Maximum number of reconnect attempts; unlimited if unset
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: Option<u32>,
}

// Default functions
fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(fallback)
}

fn default_server_url() -> String {
    std::env::var("HANGMAN_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string())
}

fn default_ping_interval() -> u64 {
    env_or("HANGMAN_PING_INTERVAL_MS", DEFAULT_PING_INTERVAL_MS)
}

fn default_timeout_interval() -> u64 {
    env_or("HANGMAN_TIMEOUT_INTERVAL_MS", DEFAULT_TIMEOUT_INTERVAL_MS)
}

fn default_reconnect_interval() -> u64 {
    env_or("HANGMAN_RECONNECT_INTERVAL_MS", DEFAULT_RECONNECT_INTERVAL_MS)
}

fn default_max_reconnect_interval() -> u64 {
    env_or(
        "HANGMAN_MAX_RECONNECT_INTERVAL_MS",
        DEFAULT_MAX_RECONNECT_INTERVAL_MS,
    )
}

fn default_reconnect_decay() -> f64 {
    env_or("HANGMAN_RECONNECT_DECAY", DEFAULT_RECONNECT_DECAY)
}

fn default_max_reconnect_attempts() -> Option<u32> {
    std::env::var("HANGMAN_MAX_RECONNECT_ATTEMPTS")
        .ok()
        .and_then(|val| val.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            client: ClientOptions::default(),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            timeout_interval_ms: default_timeout_interval(),
            reconnect_interval_ms: default_reconnect_interval(),
            max_reconnect_interval_ms: default_max_reconnect_interval(),
            reconnect_decay: default_reconnect_decay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ClientOptions {
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_timeout_interval(mut self, interval: Duration) -> Self {
        self.timeout_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_reconnect_interval(mut self, interval: Duration) -> Self {
        self.max_reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reconnect_decay(mut self, decay: f64) -> Self {
        self.reconnect_decay = decay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Heartbeat period, floored at [`MIN_PING_INTERVAL_MS`]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(MIN_PING_INTERVAL_MS))
    }

    /// Handshake timeout
    pub fn timeout_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_interval_ms)
    }

    /// Check the options for values the client cannot work with
    pub fn validate(&self) -> ClientResult<()> {
        if self.timeout_interval_ms == 0 {
            return Err(error::config_invalid(
                "timeout_interval_ms",
                "must be greater than zero",
            ));
        }
        if !self.reconnect_decay.is_finite() || self.reconnect_decay < 1.0 {
            return Err(error::config_invalid(
                "reconnect_decay",
                format!("must be a finite number >= 1.0, got {}", self.reconnect_decay),
            ));
        }
        if self.max_reconnect_interval_ms < self.reconnect_interval_ms {
            return Err(error::config_invalid(
                "max_reconnect_interval_ms",
                "must not be lower than reconnect_interval_ms",
            ));
        }
        Ok(())
    }
}

/// Check that `url` is a `ws://` or `wss://` address
pub fn validate_server_url(url: &str) -> ClientResult<()> {
    let uri: Uri = url.parse().map_err(|_| error::invalid_url(url))?;
    match (uri.scheme_str(), uri.host()) {
        (Some("ws") | Some("wss"), Some(host)) if !host.is_empty() => Ok(()),
        _ => Err(error::invalid_url(url)),
    }
}

impl Config {
    /// Validate the server address and client options
    pub fn validate(&self) -> ClientResult<()> {
        validate_server_url(&self.server_url)?;
        self.client.validate()
    }
}

/// Load the client configuration
///
/// Reads the JSON file named by `HANGMAN_CONFIG_PATH` when set, otherwise
/// falls back to defaults and environment overrides.
pub async fn load_config() -> Result<Config> {
    let config = match get_config_path() {
        Some(path) => load_config_file(&path).await?,
        None => {
            debug!("HANGMAN_CONFIG_PATH not set, using default configuration");
            Config::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// Get the path to the configuration file, if one was requested
fn get_config_path() -> Option<PathBuf> {
    std::env::var("HANGMAN_CONFIG_PATH").ok().map(PathBuf::from)
}

/// Load configuration from a JSON file
pub async fn load_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path).await?;
    let config: Config = serde_json::from_str(&config_str)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
