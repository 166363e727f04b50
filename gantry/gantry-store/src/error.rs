//! Error types for the gantry-store crate.

use thiserror::Error;

/// Errors that can occur while persisting or restoring checkpoints.
///
/// Every variant here is fatal to the current save/restore attempt, but
/// the run controller decides whether the run itself continues.
/// Per-parameter restore incidents are *not* errors; they are collected
/// into a [`RestoreReport`](crate::RestoreReport).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage could not be read or written.
    #[error("store I/O error: {0}")]
    Io(String),

    /// A record could not be serialized or deserialized.
    #[error("store serialization error: {0}")]
    Serialize(String),

    /// The store is unreachable or its state is unusable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A restore filter pattern failed to compile.
    #[error("invalid restore filter: {0}")]
    InvalidFilter(String),
}

impl StoreError {
    /// Creates an I/O error.
    #[must_use]
    pub fn io(reason: impl Into<String>) -> Self {
        Self::Io(reason.into())
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialize(reason: impl Into<String>) -> Self {
        Self::Serialize(reason.into())
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Creates an invalid filter error.
    #[must_use]
    pub fn invalid_filter(reason: impl Into<String>) -> Self {
        Self::InvalidFilter(reason.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

/// Result type for gantry-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_io() {
        let err = StoreError::io("disk full");
        assert!(err.to_string().contains("store I/O error"));
    }

    #[test]
    fn error_invalid_filter() {
        let err = StoreError::invalid_filter("unclosed group");
        assert!(err.to_string().contains("invalid restore filter"));
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StoreError = io_err.into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
