//! Error types for pysandbox

use thiserror::Error;

/// Result type alias using pysandbox's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pysandbox
///
/// Failures of the executed code itself are not represented here; those are
/// reported as data through [`crate::sandbox::ExecutionResult`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sandbox infrastructure error (worker startup, interpreter channel)
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Sandbox(_))
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Timeout("worker".into()).is_retryable());
        assert!(Error::Sandbox("startup".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());

        assert!(Error::InvalidInput("missing code".into()).is_client_error());
        assert!(!Error::Internal("boom".into()).is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Sandbox("interpreter did not start".into());
        assert_eq!(err.to_string(), "Sandbox error: interpreter did not start");
    }
}
