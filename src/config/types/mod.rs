//! Configuration types module

pub mod sandbox;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Execution engine configuration
    #[serde(default)]
    pub sandbox: sandbox::SandboxConfig,

    /// Protocol server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from environment variables and files
    ///
    /// It loads configuration from:
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Protocol server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name reported in `serverInfo`
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Timeout applied when a tool call does not name one
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: default_server_name(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_server_name() -> String {
    "python-interpreter".to_string()
}

fn default_tool_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.name, "python-interpreter");
        assert_eq!(config.server.tool_timeout_secs, 10);
        assert_eq!(config.sandbox.default_timeout_secs, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("[server]\nname = \"py\"\n").unwrap();
        assert_eq!(config.server.name, "py");
        assert_eq!(config.server.tool_timeout_secs, 10);
        assert_eq!(config.sandbox, sandbox::SandboxConfig::default());
    }
}
