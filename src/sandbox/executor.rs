//! Request, result and error types of the execution engine

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use super::runner::RawOutcome;

/// Default wall-clock limit for one request
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default memory ceiling for one request (100 MiB)
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 100 * 1024 * 1024;

/// Request to execute code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute
    pub code: String,
    /// Wall-clock timeout; 0 means the default
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Memory ceiling for the run
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_LIMIT_BYTES
}

impl ExecutionRequest {
    /// Create a new execution request with default limits
    pub fn new(code: impl Into<String>) -> Self {
        ExecutionRequest {
            code: code.into(),
            timeout_seconds: default_timeout(),
            memory_limit_bytes: default_memory_limit(),
        }
    }

    /// Set timeout in seconds
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Set memory ceiling in bytes
    pub fn with_memory_limit(mut self, memory_limit_bytes: u64) -> Self {
        self.memory_limit_bytes = memory_limit_bytes;
        self
    }

    /// Effective timeout, substituting `fallback` for 0
    pub fn effective_timeout(&self, fallback: u64) -> u64 {
        if self.timeout_seconds == 0 {
            fallback
        } else {
            self.timeout_seconds
        }
    }
}

/// Result of code execution
///
/// `error` and `result` are always serialized, as `null` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether execution was successful
    pub success: bool,
    /// Captured standard output
    pub output: String,
    /// Human-readable error (for failed execution)
    pub error: Option<String>,
    /// Value of the final expression (for successful execution)
    pub result: Option<Value>,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>, result: Option<Value>) -> Self {
        ExecutionResult {
            success: true,
            output: output.into(),
            error: None,
            result,
        }
    }

    /// Create a failure result
    pub fn failure(output: impl Into<String>, error: &ExecutionError) -> Self {
        ExecutionResult {
            success: false,
            output: output.into(),
            error: Some(error.to_string()),
            result: None,
        }
    }

    pub(crate) fn from_outcome(outcome: RawOutcome) -> Self {
        match outcome.verdict {
            Ok(result) => ExecutionResult::success(outcome.output, result),
            Err(error) => ExecutionResult::failure(outcome.output, &error),
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// Why a request did not succeed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// Static check failed; the code never ran
    #[error("SecurityError: Unsafe code detected - {reason}")]
    PolicyRejected { reason: String },

    /// Memory ceiling hit during execution
    #[error("MemoryError: Exceeded memory limit of {:.1}MB", mebibytes(*.limit_bytes))]
    MemoryExceeded { limit_bytes: u64 },

    /// An interrupt surfaced inside the running code
    #[error("ExecutionError: Code execution timed out")]
    Interrupted,

    /// Watchdog deadline elapsed
    #[error("ExecutionError: Code timed out after {seconds} seconds")]
    TimedOut { seconds: u64 },

    /// Any other exception raised by the code
    #[error("{type_name}: {message}\nTraceback:\n{traceback}")]
    RuntimeFault {
        type_name: String,
        message: String,
        traceback: String,
    },

    /// The run ended without producing an outcome
    #[error("ExecutionError: Code execution failed with no result")]
    NoResult,

    /// The engine itself failed (worker could not start or died)
    #[error("ExecutionError: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Whether this error means the deadline was hit
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::TimedOut { .. } | ExecutionError::Interrupted)
    }
}

fn mebibytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ExecutionRequest::new("1 + 1")
            .with_timeout(2)
            .with_memory_limit(1024);
        assert_eq!(request.code, "1 + 1");
        assert_eq!(request.timeout_seconds, 2);
        assert_eq!(request.memory_limit_bytes, 1024);
    }

    #[test]
    fn test_request_defaults() {
        let request: ExecutionRequest = serde_json::from_str(r#"{"code": "x"}"#).unwrap();
        assert_eq!(request.timeout_seconds, 5);
        assert_eq!(request.memory_limit_bytes, 100 * 1024 * 1024);
        assert_eq!(request.with_timeout(0).effective_timeout(7), 7);
    }

    #[test]
    fn test_error_strings() {
        let rejected = ExecutionError::PolicyRejected {
            reason: "import of blocked module 'os'".into(),
        };
        assert_eq!(
            rejected.to_string(),
            "SecurityError: Unsafe code detected - import of blocked module 'os'"
        );

        let memory = ExecutionError::MemoryExceeded {
            limit_bytes: 100 * 1024 * 1024,
        };
        assert_eq!(memory.to_string(), "MemoryError: Exceeded memory limit of 100.0MB");

        assert_eq!(
            ExecutionError::TimedOut { seconds: 3 }.to_string(),
            "ExecutionError: Code timed out after 3 seconds"
        );

        let fault = ExecutionError::RuntimeFault {
            type_name: "ZeroDivisionError".into(),
            message: "division by zero".into(),
            traceback: "  File \"<string>\", line 1".into(),
        };
        assert_eq!(
            fault.to_string(),
            "ZeroDivisionError: division by zero\nTraceback:\n  File \"<string>\", line 1"
        );
        assert!(ExecutionError::Interrupted.is_timeout());
        assert!(!fault.is_timeout());
    }

    #[test]
    fn test_result_serializes_nulls() {
        let result = ExecutionResult::success("hi\n", Some(serde_json::json!(4)));
        assert_eq!(
            result.to_string(),
            r#"{"success":true,"output":"hi\n","error":null,"result":4}"#
        );

        let failed = ExecutionResult::failure("", &ExecutionError::NoResult);
        let value: Value = serde_json::from_str(&failed.to_string()).unwrap();
        assert_eq!(value["result"], Value::Null);
        assert_eq!(
            value["error"],
            "ExecutionError: Code execution failed with no result"
        );
    }
}
