//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::Config;
use crate::error::{Error, Result};

/// A snapshot of the configuration file
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Path to the config file
    pub path: PathBuf,
    /// Whether the file exists
    pub exists: bool,
    /// Parsed configuration
    pub config: Option<Config>,
    /// Validation issues
    pub issues: Vec<String>,
}

/// Load configuration with layered precedence:
/// 1. Config file (config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    load_config_at(&super::paths::config_path())
}

/// Same as [`load_config`], reading the file at `path` instead
pub fn load_config_at(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        load_config_from_path(path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().map_or(false, |ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().map_or(false, |ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try TOML first, then JSON5
        toml::from_str(&content)
            .map_err(|e| Error::Config(e.to_string()))
            .or_else(|_| json5::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// This loads the `.env` file first and overlays any set `PYSANDBOX_*`
/// variables onto the config: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    // Sandbox overrides
    if let Some(v) = parsed(&lookup, "PYSANDBOX_TIMEOUT") {
        config.sandbox.default_timeout_secs = v;
    }
    if let Some(v) = parsed(&lookup, "PYSANDBOX_MEMORY_LIMIT") {
        config.sandbox.memory_limit_bytes = v;
    }
    if let Some(v) = parsed(&lookup, "PYSANDBOX_MAX_OUTPUT") {
        config.sandbox.max_output_bytes = v;
    }
    if let Some(paths) = lookup("PYSANDBOX_STDLIB_PATH") {
        config.sandbox.stdlib_paths = std::env::split_paths(&paths)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
    }

    // Server overrides
    if let Some(name) = lookup("PYSANDBOX_SERVER_NAME") {
        config.server.name = name;
    }
    if let Some(v) = parsed(&lookup, "PYSANDBOX_TOOL_TIMEOUT") {
        config.server.tool_timeout_secs = v;
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}: {:?} is not a valid value", key, raw);
            None
        }
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "json") {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

/// Read a configuration file into a snapshot
pub fn read_config_snapshot(path: &Path) -> ConfigSnapshot {
    if !path.exists() {
        return ConfigSnapshot {
            path: path.to_path_buf(),
            exists: false,
            config: None,
            issues: vec!["Configuration file does not exist".to_string()],
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigSnapshot {
            path: path.to_path_buf(),
            exists: true,
            config: Some(config),
            issues: Vec::new(),
        },
        Err(e) => ConfigSnapshot {
            path: path.to_path_buf(),
            exists: true,
            config: None,
            issues: vec![e.to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.sandbox.default_timeout_secs = 9;
        config.server.name = "interp".into();
        save_config(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_and_load_json5() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        save_config(&Config::default(), &path).unwrap();
        assert_eq!(load_config_from_path(&path).unwrap(), Config::default());

        // Comments and trailing commas are accepted
        std::fs::write(&path, "{ // tuned\n sandbox: { default_timeout_secs: 2, }, }").unwrap();
        assert_eq!(load_config_from_path(&path).unwrap().sandbox.default_timeout_secs, 2);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PYSANDBOX_TIMEOUT", "12"),
            ("PYSANDBOX_MEMORY_LIMIT", "1048576"),
            ("PYSANDBOX_STDLIB_PATH", "/a:/b"),
            ("PYSANDBOX_SERVER_NAME", "py"),
            ("PYSANDBOX_TOOL_TIMEOUT", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.sandbox.default_timeout_secs, 12);
        assert_eq!(config.sandbox.memory_limit_bytes, 1024 * 1024);
        assert_eq!(config.sandbox.stdlib_paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(config.server.name, "py");
        // Invalid values leave the previous setting
        assert_eq!(config.server.tool_timeout_secs, 10);
    }

    #[test]
    fn test_snapshot_reports_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let missing = read_config_snapshot(&path);
        assert!(!missing.exists);

        std::fs::write(&path, "sandbox = [").unwrap();
        let broken = read_config_snapshot(&path);
        assert!(broken.exists);
        assert!(broken.config.is_none());
        assert_eq!(broken.issues.len(), 1);
    }
}
