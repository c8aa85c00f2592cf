//! Error types for the lifecycle engine.

use enclaved_docker::RuntimeError;
use enclaved_error::CommonError;
use thiserror::Error;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur in the resource-lifecycle engine.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Common errors shared across `enclaved` crates.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Error from the container runtime.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Malformed input rejected before any runtime call.
    #[error("validation error: {0}")]
    Validation(String),

    /// Subnet allocation failure.
    #[error("network allocation error: {0}")]
    Allocation(String),

    /// Port-spec serialization/deserialization failure.
    #[error("port spec error: {0}")]
    PortSpec(String),

    /// One or more per-resource failures rolled up for a single domain
    /// object (enclave, service) in a partial-failure result map.
    #[error("one or more operations failed:\n{0}")]
    Aggregate(String),

    /// A detected contract violation. Indicates a bug in enclaved, not bad
    /// input; surfaced fatally rather than silently ignored.
    #[error("internal consistency error: {0}; this is a bug in enclaved")]
    InternalConsistency(String),
}

impl BackendError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates an allocation error.
    #[must_use]
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Creates a port-spec error.
    #[must_use]
    pub fn port_spec(msg: impl Into<String>) -> Self {
        Self::PortSpec(msg.into())
    }

    /// Creates an internal-consistency error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalConsistency(msg.into())
    }

    /// Rolls several per-resource error messages into one.
    #[must_use]
    pub fn aggregate(messages: Vec<String>) -> Self {
        Self::Aggregate(messages.join("\n\n"))
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::Common(CommonError::not_found(resource))
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::Common(CommonError::already_exists(resource))
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::config(msg))
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::timeout(msg))
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Common(common) if common.is_not_found())
    }

    /// Returns true if this is an already-exists error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Common(common) if common.is_already_exists())
    }
}
