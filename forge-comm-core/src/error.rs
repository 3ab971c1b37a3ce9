//! Error types for forge-comm

use thiserror::Error;

/// The main error type for forge-comm operations
#[derive(Error, Debug)]
pub enum Error {
    /// The persisted bus could not be read, written or locked
    #[error("Storage error: {0}")]
    Storage(String),

    /// A reply targeted a message that is not on the bus
    #[error("Not found: {0}")]
    NotFound(String),

    /// A listener handler failed while processing a message
    #[error("Handler error: {0}")]
    Handler(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for forge-comm operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Whether this error came from the storage layer
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// Whether this error reports a missing message
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
