use std::fmt;
use thiserror::Error;

/// Main error type for the Hangman client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    /// Error code for categorization and identification
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional context for more detailed error information
    pub context: Option<String>,
}

/// Type alias for client results
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Create a new error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Attach context to the error
    pub fn with_context(mut self, context: impl fmt::Display) -> Self {
        self.context = Some(context.to_string());
        self
    }

    /// Whether the error is caused by misuse of the API rather than by the network
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::InvalidPayload | ErrorCode::InvalidUrl | ErrorCode::ConfigInvalid
        )
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

/// Enumeration of error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Usage errors
    InvalidPayload,
    InvalidUrl,
    ConfigInvalid,

    // Transport errors
    ConnectFailed,
    SendFailed,

    // Lifecycle errors
    NotConnecting,
    ConnectionClosed,
    ReconnectExhausted,
    ClientShutDown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code_str = match self {
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",

            ErrorCode::ConnectFailed => "CONNECT_FAILED",
            ErrorCode::SendFailed => "SEND_FAILED",

            ErrorCode::NotConnecting => "NOT_CONNECTING",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::ReconnectExhausted => "RECONNECT_EXHAUSTED",
            ErrorCode::ClientShutDown => "CLIENT_SHUT_DOWN",
        };
        write!(f, "{}", code_str)
    }
}

// Helper functions to create standard errors

/// Create an invalid payload error
pub fn invalid_payload(error: impl fmt::Display) -> ClientError {
    ClientError::new(ErrorCode::InvalidPayload, "Payload cannot be serialized").with_context(error)
}

/// Create an invalid URL error
pub fn invalid_url(url: &str) -> ClientError {
    ClientError::new(
        ErrorCode::InvalidUrl,
        format!("The url '{}' is not a valid ws url", url),
    )
}

/// Create an invalid configuration error
pub fn config_invalid(key: &str, reason: impl fmt::Display) -> ClientError {
    ClientError::new(ErrorCode::ConfigInvalid, format!("Invalid value for '{}'", key))
        .with_context(reason)
}

/// Create a transport connection failed error
pub fn connect_failed(error: impl fmt::Display) -> ClientError {
    ClientError::new(ErrorCode::ConnectFailed, "Failed to open transport").with_context(error)
}

/// Create a frame send failed error
pub fn send_failed(error: impl fmt::Display) -> ClientError {
    ClientError::new(ErrorCode::SendFailed, "Failed to write frame").with_context(error)
}

/// Create an error for waiting on a client that is closed with nothing scheduled
pub fn not_connecting() -> ClientError {
    ClientError::new(
        ErrorCode::NotConnecting,
        "Client is closed and no connection attempt is pending",
    )
}

/// Create an error for a close that ends the connection for good
pub fn connection_closed(code: u16, reason: &str) -> ClientError {
    ClientError::new(ErrorCode::ConnectionClosed, "Connection closed without reconnect")
        .with_context(format!("{} {}", code, reason))
}

/// Create a reconnect exhausted error
pub fn reconnect_exhausted() -> ClientError {
    ClientError::new(
        ErrorCode::ReconnectExhausted,
        "Connection closed with 'Try Again Later', no further reconnect",
    )
}

/// Create a client shut down error
pub fn client_shut_down() -> ClientError {
    ClientError::new(ErrorCode::ClientShutDown, "Client has been shut down")
}
