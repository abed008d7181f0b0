//! Shared error type across overlink crates.

use thiserror::Error;

/// Stable error codes (used in logs, metrics labels and test vectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed or oversized frame.
    Framing,
    /// Well-formed header with an id outside the type table.
    UnknownType,
    /// Payload does not match its schema.
    Payload,
    /// No live peer to send to.
    NotConnected,
    /// A handler failed or panicked.
    HandlerFailure,
    /// Bind/connect failed.
    TransportSetup,
    /// Invalid configuration.
    Config,
    /// Wrapped I/O failure.
    Io,
}

impl ErrorCode {
    /// String representation used in logs and vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Framing => "FRAMING",
            ErrorCode::UnknownType => "UNKNOWN_TYPE",
            ErrorCode::Payload => "PAYLOAD",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::HandlerFailure => "HANDLER_FAILURE",
            ErrorCode::TransportSetup => "TRANSPORT_SETUP",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Io => "IO",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, OverlinkError>;

/// Unified error type used by core and bus.
#[derive(Debug, Error)]
pub enum OverlinkError {
    #[error("framing error: {0}")]
    Framing(String),
    #[error("unknown message type id: {0}")]
    UnknownType(u32),
    #[error("payload error: {0}")]
    Payload(String),
    #[error("not connected")]
    NotConnected,
    #[error("handler failure: {0}")]
    HandlerFailure(String),
    #[error("transport setup failed: {0}")]
    TransportSetup(String),
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(String),
}

impl OverlinkError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            OverlinkError::Framing(_) => ErrorCode::Framing,
            OverlinkError::UnknownType(_) => ErrorCode::UnknownType,
            OverlinkError::Payload(_) => ErrorCode::Payload,
            OverlinkError::NotConnected => ErrorCode::NotConnected,
            OverlinkError::HandlerFailure(_) => ErrorCode::HandlerFailure,
            OverlinkError::TransportSetup(_) => ErrorCode::TransportSetup,
            OverlinkError::Config(_) => ErrorCode::Config,
            OverlinkError::Io(_) => ErrorCode::Io,
        }
    }

    /// Whether the error must tear down a stream connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, OverlinkError::Framing(_) | OverlinkError::UnknownType(_))
    }
}

impl From<std::io::Error> for OverlinkError {
    fn from(e: std::io::Error) -> Self {
        OverlinkError::Io(e.to_string())
    }
}
