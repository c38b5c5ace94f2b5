//! Error types for the vecseg library.
//!
//! All fallible operations return [`VecSegError`]. The variants mirror the
//! failure classes the engine distinguishes: configuration problems are
//! detected up front, I/O and corruption errors fail the enclosing
//! operation, resource exhaustion is reported but non-fatal to the caller's
//! main path, and consistency errors guard the builder and merger
//! invariants.
//!
//! # Examples
//!
//! ```
//! use vecseg::error::{VecSegError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(VecSegError::config("dimension must be positive"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for vecseg operations.
#[derive(Error, Debug)]
pub enum VecSegError {
    /// I/O errors (file operations, truncated reads, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration (dimension, metric, algorithm, parameter text).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// On-disk data does not match its framing or checksum.
    #[error("Corrupted segment data: {0}")]
    Corruption(String),

    /// Failure reported by an ANN engine call.
    #[error("Engine error: {0}")]
    Engine(String),

    /// An internal invariant between structures was violated.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Resource exhausted (queue full, memory limit)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Operation is not supported by this component
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Binary serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for operations that may fail with VecSegError.
pub type Result<T> = std::result::Result<T, VecSegError>;

impl VecSegError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        VecSegError::Config(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        VecSegError::Storage(msg.into())
    }

    /// Create a new corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        VecSegError::Corruption(msg.into())
    }

    /// Create a new engine error.
    pub fn engine<S: Into<String>>(msg: S) -> Self {
        VecSegError::Engine(msg.into())
    }

    /// Create a new consistency error.
    pub fn consistency<S: Into<String>>(msg: S) -> Self {
        VecSegError::Consistency(msg.into())
    }

    /// Create a new resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        VecSegError::ResourceExhausted(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        VecSegError::InvalidOperation(msg.into())
    }

    /// Create a new unsupported operation error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        VecSegError::Unsupported(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        VecSegError::NotFound(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        VecSegError::Serialization(msg.into())
    }

    /// Whether this error only means a side effect was dropped.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, VecSegError::ResourceExhausted(_))
    }
}

impl From<bincode::Error> for VecSegError {
    fn from(err: bincode::Error) -> Self {
        VecSegError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = VecSegError::config("bad dimension");
        assert_eq!(error.to_string(), "Configuration error: bad dimension");

        let error = VecSegError::engine("train failed");
        assert_eq!(error.to_string(), "Engine error: train failed");

        let error = VecSegError::consistency("pk 7 has no embedding");
        assert_eq!(error.to_string(), "Consistency error: pk 7 has no embedding");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::UnexpectedEof, "truncated");
        let error = VecSegError::from(io_error);

        match error {
            VecSegError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_resource_exhausted_is_flagged() {
        assert!(VecSegError::resource_exhausted("queue full").is_resource_exhausted());
        assert!(!VecSegError::storage("disk").is_resource_exhausted());
    }
}
