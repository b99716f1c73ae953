//! Sandbox module - Restricted Python execution
//!
//! A request flows through five stages:
//! - Policy: static rejection of blocked imports and calls
//! - Namespace: fresh globals with masked builtins and the persisted state
//! - Runner: stream capture, heap budget and result extraction
//! - Watchdog: wall-clock deadline with cooperative cancellation
//! - Normalize: conversion of the final value into JSON
//!
//! [`PythonExecutor`] is a persistent session; [`execute_python_code`] runs a
//! single request in a throwaway one.

mod executor;
mod interpreter;
pub mod memory;
mod namespace;
mod normalize;
mod output;
pub mod policy;
mod runner;
mod session;
mod watchdog;

pub use executor::{
    ExecutionError, ExecutionRequest, ExecutionResult, DEFAULT_MEMORY_LIMIT_BYTES,
    DEFAULT_TIMEOUT_SECS,
};
pub use interpreter::detect_stdlib_paths;
pub use namespace::MASKED_BUILTINS;
pub use normalize::normalize;
pub use output::TRUNCATION_MARKER;
pub use policy::PolicyDecision;
pub use session::PythonExecutor;
pub use watchdog::{JobControl, Phase, Watchdog};

use crate::config::SandboxConfig;

/// Run `code` once in a fresh session with default settings.
///
/// Nothing persists between calls. A session that cannot be started is
/// reported as a failed result.
pub fn execute_python_code(code: &str, timeout_seconds: u64, memory_limit_bytes: u64) -> ExecutionResult {
    let request = ExecutionRequest::new(code)
        .with_timeout(timeout_seconds)
        .with_memory_limit(memory_limit_bytes);

    // Rejected code never needs an interpreter.
    if let PolicyDecision::Rejected(reason) = policy::check(code) {
        return ExecutionResult::failure("", &ExecutionError::PolicyRejected { reason });
    }

    match PythonExecutor::new(SandboxConfig::default()) {
        Ok(executor) => executor.execute(&request),
        Err(e) => ExecutionResult::failure("", &ExecutionError::Internal(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_execution() {
        let result = execute_python_code("print('hello')\n6 * 7", 5, DEFAULT_MEMORY_LIMIT_BYTES);
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "hello\n");
        assert_eq!(result.result, Some(serde_json::json!(42)));
    }

    #[test]
    fn test_one_shot_calls_do_not_share_state() {
        let first = execute_python_code("shared = 1", 5, DEFAULT_MEMORY_LIMIT_BYTES);
        assert!(first.success);

        let second = execute_python_code("shared", 5, DEFAULT_MEMORY_LIMIT_BYTES);
        assert!(!second.success);
        assert!(second.error.unwrap().starts_with("NameError"));
    }

    #[test]
    fn test_one_shot_rejects_without_running() {
        let result = execute_python_code("import os\nprint('never')", 5, DEFAULT_MEMORY_LIMIT_BYTES);
        assert!(!result.success);
        assert_eq!(result.output, "");
        assert_eq!(
            result.error.as_deref(),
            Some("SecurityError: Unsafe code detected - import of blocked module 'os'")
        );
    }
}
