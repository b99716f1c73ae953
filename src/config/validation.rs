//! Configuration validation
//!
//! Validates configuration and reports issues.

use std::path::PathBuf;
use std::time::Duration;

use super::types::Config;
use crate::sandbox::detect_stdlib_paths;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_limits(config, result);
    result = validate_watchdog(config, result);
    result = validate_interpreter(config, result);
    result = validate_server(config, result);

    result
}

/// Below this the interpreter cannot even import its own modules.
const MIN_USEFUL_MEMORY: u64 = 8 * 1024 * 1024;

/// Below this deeply recursive code overflows the worker's native stack.
const MIN_WORKER_STACK: usize = 4 * 1024 * 1024;

fn validate_limits(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    if sandbox.default_timeout_secs == 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.default_timeout_secs", "Default timeout must be positive")
                .with_suggestion("Set sandbox.default_timeout_secs to at least 1"),
        );
    }

    if sandbox.memory_limit_bytes == 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.memory_limit_bytes", "Memory limit must be positive")
                .with_suggestion("Set sandbox.memory_limit_bytes, e.g. 104857600 for 100MB"),
        );
    } else if sandbox.memory_limit_bytes < MIN_USEFUL_MEMORY {
        result = result.with_warning(
            ValidationIssue::new(
                "sandbox.memory_limit_bytes",
                format!(
                    "Memory limit of {} bytes is too small for most code",
                    sandbox.memory_limit_bytes
                ),
            )
            .with_suggestion("Use at least 8MB"),
        );
    }

    if sandbox.max_output_bytes == 0 {
        result = result.with_warning(
            ValidationIssue::new("sandbox.max_output_bytes", "All printed output will be discarded")
                .with_suggestion("Set sandbox.max_output_bytes to a positive size"),
        );
    }

    result
}

fn validate_watchdog(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    if sandbox.poll_interval.is_zero() {
        result = result.with_error(
            ValidationIssue::new("sandbox.poll_interval", "Poll interval must be positive")
                .with_suggestion("Use a value such as \"10ms\""),
        );
    } else if sandbox.default_timeout_secs > 0
        && sandbox.poll_interval >= Duration::from_secs(sandbox.default_timeout_secs)
    {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.poll_interval",
                format!(
                    "Poll interval {:?} is not shorter than the default timeout of {}s",
                    sandbox.poll_interval, sandbox.default_timeout_secs
                ),
            )
            .with_suggestion("Lower sandbox.poll_interval or raise sandbox.default_timeout_secs"),
        );
    }

    if sandbox.startup_timeout.is_zero() {
        result = result.with_error(
            ValidationIssue::new("sandbox.startup_timeout", "Startup timeout must be positive")
                .with_suggestion("Use a value such as \"30s\""),
        );
    }

    result
}

fn validate_interpreter(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    let stdlib = interpreter_stdlib(config);
    if stdlib.is_empty() {
        result = result.with_warning(
            ValidationIssue::new(
                "sandbox.stdlib_paths",
                "No Python standard library found; only built-in modules can be imported",
            )
            .with_suggestion("Install python3 or set PYSANDBOX_STDLIB_PATH"),
        );
    }

    for path in &sandbox.stdlib_paths {
        if !path.is_dir() {
            result = result.with_warning(ValidationIssue::new(
                "sandbox.stdlib_paths",
                format!("Standard library directory does not exist: {}", path.display()),
            ));
        }
    }

    if sandbox.worker_stack_size < MIN_WORKER_STACK {
        result = result.with_warning(
            ValidationIssue::new(
                "sandbox.worker_stack_size",
                format!("Worker stack of {} bytes may overflow on recursion", sandbox.worker_stack_size),
            )
            .with_suggestion("Use at least 4MB"),
        );
    }

    result
}

fn interpreter_stdlib(config: &Config) -> Vec<PathBuf> {
    if config.sandbox.stdlib_paths.is_empty() {
        detect_stdlib_paths().into_iter().map(PathBuf::from).collect()
    } else {
        config.sandbox.stdlib_paths.clone()
    }
}

fn validate_server(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.server.name.trim().is_empty() {
        result = result.with_error(ValidationIssue::new("server.name", "Server name must not be empty"));
    }

    if config.server.tool_timeout_secs == 0 {
        result = result.with_warning(
            ValidationIssue::new(
                "server.tool_timeout_secs",
                "Tool calls without a timeout will use sandbox.default_timeout_secs",
            ),
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);

        // Default config may warn about a missing stdlib but has no errors
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_zero_limits_are_errors() {
        let mut config = Config::default();
        config.sandbox.default_timeout_secs = 0;
        config.sandbox.memory_limit_bytes = 0;
        config.sandbox.poll_interval = Duration::ZERO;

        let result = validate_config(&config);
        assert!(!result.valid);
        let paths: Vec<&str> = result.errors.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"sandbox.default_timeout_secs"));
        assert!(paths.contains(&"sandbox.memory_limit_bytes"));
        assert!(paths.contains(&"sandbox.poll_interval"));
    }

    #[test]
    fn test_poll_interval_must_be_shorter_than_timeout() {
        let mut config = Config::default();
        config.sandbox.default_timeout_secs = 1;
        config.sandbox.poll_interval = Duration::from_secs(2);

        let result = validate_config(&config);
        assert!(result.errors.iter().any(|i| i.path == "sandbox.poll_interval"));
    }

    #[test]
    fn test_small_resources_are_warnings() {
        let mut config = Config::default();
        config.sandbox.memory_limit_bytes = 1024;
        config.sandbox.worker_stack_size = 64 * 1024;
        config.sandbox.stdlib_paths = vec![PathBuf::from("/nonexistent/python")];

        let result = validate_config(&config);
        assert!(result.valid);
        let paths: Vec<&str> = result.warnings.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"sandbox.memory_limit_bytes"));
        assert!(paths.contains(&"sandbox.worker_stack_size"));
        assert!(paths.contains(&"sandbox.stdlib_paths"));
    }
}
