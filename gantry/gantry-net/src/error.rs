//! Error types for the gantry-net crate.

use thiserror::Error;

/// Errors that can occur in the numeric substrate.
#[derive(Debug, Error)]
pub enum NetError {
    /// Tensor shapes are incompatible for the requested operation.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A named parameter was not found in the parameter set.
    #[error("missing parameter: {0}")]
    MissingParam(String),

    /// A network was configured with invalid dimensions.
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),

    /// A requested execution device is not available.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The parameter set is already bound to an optimizer.
    #[error("parameter set already bound: {0}")]
    AlreadyBound(String),

    /// The activation tape does not match the backward traversal.
    #[error("tape underflow: {0}")]
    TapeUnderflow(String),
}

impl NetError {
    /// Creates a shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(reason: impl Into<String>) -> Self {
        Self::ShapeMismatch(reason.into())
    }

    /// Creates a missing parameter error.
    #[must_use]
    pub fn missing_param(name: impl Into<String>) -> Self {
        Self::MissingParam(name.into())
    }

    /// Creates an invalid dimension error.
    #[must_use]
    pub fn invalid_dimension(reason: impl Into<String>) -> Self {
        Self::InvalidDimension(reason.into())
    }

    /// Creates a device unavailable error.
    #[must_use]
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable(reason.into())
    }

    /// Creates an already-bound error.
    #[must_use]
    pub fn already_bound(reason: impl Into<String>) -> Self {
        Self::AlreadyBound(reason.into())
    }

    /// Creates a tape underflow error.
    #[must_use]
    pub fn tape_underflow(reason: impl Into<String>) -> Self {
        Self::TapeUnderflow(reason.into())
    }
}

/// Result type for gantry-net operations.
pub type Result<T> = std::result::Result<T, NetError>;
