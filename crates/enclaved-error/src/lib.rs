//! Common error types for `enclaved`.
//!
//! This crate provides unified error types that are shared across multiple `enclaved` crates,
//! reducing code duplication and ensuring consistent error handling patterns.
//!
//! # Usage
//!
//! ```rust
//! use enclaved_error::CommonError;
//!
//! fn example() -> Result<(), CommonError> {
//!     Err(CommonError::not_found("enclave 65d2fb6d6732"))
//! }
//! ```
//!
//! # Crate-Specific Errors
//!
//! Each crate defines its own error type that wraps `CommonError`:
//!
//! ```rust,ignore
//! use enclaved_error::CommonError;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum MyError {
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//!
//!     #[error("my specific error: {0}")]
//!     Specific(String),
//! }
//! ```

mod common;

pub use common::CommonError;

/// Result type alias using `CommonError`.
pub type Result<T> = std::result::Result<T, CommonError>;
