//! Error types for runtime operations.

use enclaved_error::CommonError;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Common errors shared across `enclaved` crates.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// The runtime's API rejected or failed a call.
    ///
    /// The daemon's error text is preserved verbatim: callers match on it to
    /// recognize transient races (e.g. the overlapping-address-pool error).
    #[error("runtime API error: {0}")]
    Api(String),

    /// The runtime returned a response we could not interpret.
    #[error("malformed runtime response: {0}")]
    MalformedResponse(String),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Api(err.to_string())
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl RuntimeError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::Common(CommonError::not_found(resource))
    }

    /// Creates a malformed-response error.
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }
}
