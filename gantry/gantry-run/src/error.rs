//! Error types for the gantry-run crate.
//!
//! Structural and configuration errors abort a run before any training
//! step executes. Per-parameter restore incidents are deliberately *not*
//! here: they live in [`gantry_store::RestoreReport`] and never abort a
//! restore.

use gantry_net::NetError;
use gantry_store::StoreError;
use thiserror::Error;

/// Errors that can occur while building or driving a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A symbolic selector has no registered factory.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// A specification node is malformed, identified by its dotted path.
    #[error("invalid configuration at '{path}': {reason}")]
    InvalidConfiguration {
        /// Dotted path of the offending node, e.g. `model.optimizer`.
        path: String,
        /// What was wrong.
        reason: String,
    },

    /// A requested execution device is not available.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The external store rejected a read or write.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// A numeric operation failed in the computation runtime.
    #[error("numeric error: {0}")]
    Net(NetError),

    /// The data provider could not produce a batch.
    #[error("data provider error: {0}")]
    Provider(String),
}

impl RunError {
    /// Creates an unknown capability error.
    #[must_use]
    pub fn unknown_capability(selector: impl Into<String>) -> Self {
        Self::UnknownCapability(selector.into())
    }

    /// Creates an invalid configuration error for a node path.
    #[must_use]
    pub fn invalid_config(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a data provider error.
    #[must_use]
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider(reason.into())
    }
}

impl From<NetError> for RunError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::DeviceUnavailable(device) => Self::DeviceUnavailable(device),
            other => Self::Net(other),
        }
    }
}

/// Result type for gantry-run operations.
pub type Result<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_unknown_capability_names_selector() {
        let err = RunError::unknown_capability("SGD");
        assert!(err.to_string().contains("unknown capability"));
        assert!(err.to_string().contains("SGD"));
    }

    #[test]
    fn error_invalid_config_names_path() {
        let err = RunError::invalid_config("model.optimizer", "missing 'func' key");
        assert!(err.to_string().contains("model.optimizer"));
        assert!(err.to_string().contains("missing 'func'"));
    }

    #[test]
    fn net_device_errors_map_to_device_unavailable() {
        let err: RunError = NetError::device_unavailable("accel:0").into();
        assert!(matches!(err, RunError::DeviceUnavailable(_)));
    }

    #[test]
    fn store_errors_map_to_persistence() {
        let err: RunError = StoreError::io("disk full").into();
        assert!(matches!(err, RunError::Persistence(_)));
    }
}
