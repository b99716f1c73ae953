//! Execution engine configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Timeout for requests that do not set one
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
    /// Memory ceiling for requests that do not set one
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,
    /// Maximum captured output size in bytes
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
    /// How often the watchdog checks on a running job
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// How long to keep interrupting a job after its deadline
    #[serde(with = "humantime_serde", default = "default_interrupt_grace")]
    pub interrupt_grace: Duration,
    /// Upper bound on how long a job may wait behind an abandoned one; a
    /// request's own timeout applies when it is shorter
    #[serde(with = "humantime_serde", default = "default_queue_timeout")]
    pub queue_timeout: Duration,
    /// How long to wait for a new interpreter to come up
    #[serde(with = "humantime_serde", default = "default_startup_timeout")]
    pub startup_timeout: Duration,
    /// Stack size of session worker threads
    #[serde(default = "default_stack_size")]
    pub worker_stack_size: usize,
    /// Directories holding the pure-Python standard library; empty means autodetect
    #[serde(default)]
    pub stdlib_paths: Vec<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            default_timeout_secs: default_timeout(),
            memory_limit_bytes: default_memory_limit(),
            max_output_bytes: default_max_output(),
            poll_interval: default_poll_interval(),
            interrupt_grace: default_interrupt_grace(),
            queue_timeout: default_queue_timeout(),
            startup_timeout: default_startup_timeout(),
            worker_stack_size: default_stack_size(),
            stdlib_paths: Vec::new(),
        }
    }
}

fn default_timeout() -> u64 {
    crate::sandbox::DEFAULT_TIMEOUT_SECS
}

fn default_memory_limit() -> u64 {
    crate::sandbox::DEFAULT_MEMORY_LIMIT_BYTES
}

fn default_max_output() -> usize {
    1024 * 1024 // 1MB
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_interrupt_grace() -> Duration {
    Duration::from_millis(500)
}

fn default_queue_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stack_size() -> usize {
    32 * 1024 * 1024
}
