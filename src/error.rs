//! Error types for the stratum library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`StratumError`] enum. Constructor helpers keep call sites short.

use std::io;

use thiserror::Error;

/// The main error type for stratum operations.
#[derive(Error, Debug)]
pub enum StratumError {
    /// I/O errors from the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk data failed validation (bad magic, version, or checksum).
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Schema-related errors, including startup schema mismatch.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Storage-related errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid operation for the current maintainer state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Operation cancelled by a stop token. Not a data error: the caller
    /// may retry on the next scheduler poll.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with [`StratumError`].
pub type Result<T> = std::result::Result<T, StratumError>;

impl StratumError {
    /// Create a new corrupt-data error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        StratumError::Corrupt(msg.into())
    }

    /// Create a new schema error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        StratumError::Schema(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        StratumError::Storage(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        StratumError::InvalidOperation(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        StratumError::Cancelled(msg.into())
    }

    /// True when the error only defers work (cancellation), leaving
    /// durable state untouched.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StratumError::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = StratumError::corrupt("bad magic");
        assert_eq!(error.to_string(), "Corrupt data: bad magic");

        let error = StratumError::schema("field type changed");
        assert_eq!(error.to_string(), "Schema error: field type changed");

        let error = StratumError::cancelled("fusion");
        assert!(error.is_cancelled());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "missing");
        let error = StratumError::from(io_error);

        match error {
            StratumError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_anyhow_conversion() {
        let error = StratumError::from(anyhow::anyhow!("wrapped"));
        assert_eq!(error.to_string(), "Anyhow error: wrapped");
    }
}
