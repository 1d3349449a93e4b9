//! Error handling for the chat server

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),
    /// Inbound line could not be decoded
    #[error("Invalid line: {0}")]
    InvalidLine(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// The coordinator task is gone and no longer accepts events
    #[error("Coordinator closed: {0}")]
    CoordinatorClosed(String),
    /// Server internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Network(_) => 1000,
            ChatError::InvalidLine(_) => 1001,
            ChatError::Config(_) => 1002,
            ChatError::CoordinatorClosed(_) => 1003,
            ChatError::Internal(_) => 1004,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Network(msg)
            | ChatError::InvalidLine(msg)
            | ChatError::Config(msg)
            | ChatError::CoordinatorClosed(msg)
            | ChatError::Internal(msg) => msg,
        }
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create an invalid line error
    pub fn invalid_line<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidLine(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create a coordinator-closed error
    pub fn coordinator_closed<T: Into<String>>(msg: T) -> Self {
        ChatError::CoordinatorClosed(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<LinesCodecError> for ChatError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                ChatError::InvalidLine("line exceeds maximum length".to_string())
            }
            LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                ChatError::InvalidLine(format!("not valid UTF-8: {}", e))
            }
            LinesCodecError::Io(e) => e.into(),
        }
    }
}
