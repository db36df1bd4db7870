//! Error types for the emberkv storage engine.

use std::io;

use thiserror::Error;

/// The result type used throughout emberkv.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for emberkv operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption was detected in a sorted run.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A required resource (such as the database directory) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted on a value in the wrong state,
    /// e.g. reading the payload of a tombstone.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The table does not support this operation (sorted runs are read-only).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The database already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new unsupported operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidArgument(format!("invalid options: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("offset out of range");
        assert_eq!(err.to_string(), "Data corruption: offset out of range");

        let err = Error::unsupported("upsert on sorted run");
        assert_eq!(err.to_string(), "Unsupported operation: upsert on sorted run");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
