//! # pysandbox
//!
//! Restricted execution of untrusted Python snippets with bounded time and
//! memory, returning a structured, serializable result.
//!
//! ## Features
//!
//! - **Static Policy:** Blocked imports and calls are rejected before anything runs
//! - **Persistent Sessions:** Variables carry over between successful runs
//! - **Hard Deadlines:** A watchdog reports timeouts even when the code ignores them
//! - **Memory Ceilings:** Per-run heap accounting raises `MemoryError` in the code
//! - **MCP Server:** The engine is exposed as protocol tools over stdio

pub mod config;
pub mod error;
pub mod mcp;
pub mod sandbox;
pub mod tools;

pub use config::Config;
pub use error::{Error, Result};
pub use sandbox::{
    execute_python_code, ExecutionError, ExecutionRequest, ExecutionResult, PythonExecutor,
};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");

// Binaries built on the library install the allocator themselves; see
// `sandbox::memory::TrackingAllocator`.
#[cfg(any(test, feature = "tracking-allocator"))]
#[global_allocator]
static GLOBAL: sandbox::memory::TrackingAllocator = sandbox::memory::TrackingAllocator;
