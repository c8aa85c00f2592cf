//! Common error types shared across `enclaved` crates.

use thiserror::Error;

/// Common errors that occur across multiple `enclaved` crates.
///
/// This enum provides a unified set of error variants for scenarios that
/// recur everywhere in the stack: I/O failures, resource lookup misses,
/// idempotency-guard violations, and timeouts. Crate-specific errors wrap
/// this type using the `#[from]` attribute.
#[derive(Debug, Error)]
pub enum CommonError {
    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    ///
    /// Indicates invalid input or a detected misuse of the engine, e.g.
    /// calling an operation from the wrong process context.
    #[error("configuration error: {0}")]
    Config(String),

    /// Resource not found.
    ///
    /// Used when a requested resource (enclave, container, volume, network)
    /// does not exist in the runtime.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    ///
    /// Used by idempotency guards when attempting to create a resource that
    /// already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Invalid state transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Operation timeout.
    ///
    /// Used when a bounded-retry wait exhausts its retries.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal error.
    ///
    /// A detected contract violation. These indicate a bug rather than bad
    /// input and are never silently swallowed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommonError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new already exists error.
    #[must_use]
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists(resource.into())
    }

    /// Creates a new invalid state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is an already exists error.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Returns true if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
