//! Error types for reslock.
//!
//! Uses thiserror for derive macros. Every failure surfaces to the direct
//! caller; the core never logs-and-suppresses.

use std::time::Duration;
use thiserror::Error;

/// Main error type for reslock operations.
#[derive(Error, Debug)]
pub enum ReslockError {
    /// No resource in the inventory can structurally satisfy the
    /// requirements. Never retried.
    #[error("suitable resource not available ({0})")]
    ResourceNotFound(String),

    /// Matching candidates existed but none became free within the deadline.
    #[error("allocation timeout ({0:?})")]
    Timeout(Duration),

    /// The resource inventory is malformed (not a list, missing or
    /// duplicate `id`). Fatal at load/refresh time.
    #[error("invalid resource inventory: {0}")]
    Validation(String),

    /// A requirement specification could not be parsed (bad JSON, bad
    /// `key=value` string, unknown predicate operator).
    #[error("invalid requirements: {0}")]
    Parse(String),

    /// Another process currently holds the marker file for this resource.
    /// The engine treats this as a retry signal, never as a final error.
    #[error("resource '{resource_id}' is locked by another process{holder}")]
    AlreadyLocked {
        /// The contested resource id.
        resource_id: String,
        /// Diagnostic suffix describing the current holder, if readable.
        holder: String,
    },

    /// The allocation was already released. Programmer error.
    #[error("allocation already released")]
    AlreadyReleased,

    /// The supplied token does not match the allocation's token.
    /// Programmer error.
    #[error("allocation token mismatch")]
    TokenMismatch,

    /// The backing resource provider failed after exhausting its internal
    /// retry policy.
    #[error("resource provider error: {0}")]
    Provider(String),

    /// Invalid command-line usage.
    #[error("{0}")]
    Usage(String),

    /// Underlying filesystem or subprocess failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for reslock operations.
pub type Result<T> = std::result::Result<T, ReslockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_includes_timeout_value() {
        let err = ReslockError::Timeout(Duration::from_secs(7));
        assert!(err.to_string().contains("7s"));
    }

    #[test]
    fn already_locked_message_names_resource() {
        let err = ReslockError::AlreadyLocked {
            resource_id: "dut-1".to_string(),
            holder: " (pid 42)".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dut-1"));
        assert!(msg.contains("pid 42"));
    }

    #[test]
    fn resource_not_found_message_carries_requirements() {
        let err = ReslockError::ResourceNotFound(r#"{"online":true}"#.to_string());
        assert!(err.to_string().contains("online"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ReslockError = io.into();
        assert!(matches!(err, ReslockError::Io(_)));
    }
}
