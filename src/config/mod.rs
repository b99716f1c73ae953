//! Configuration module - Modular configuration management
//!
//! - types/mod.rs: Core configuration types (Config, ServerConfig)
//! - types/sandbox.rs: Execution engine configuration
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{Config, ServerConfig};

// Re-export sandbox types
pub use types::sandbox::SandboxConfig;

// Re-export IO and utilities
pub use io::{
    apply_env_overrides, load_config, load_config_at, load_config_from_path, read_config_snapshot,
    save_config, ConfigSnapshot,
};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
