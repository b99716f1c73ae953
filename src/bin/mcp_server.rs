//! pysandbox MCP server
//!
//! Serves the Python execution tools over stdio, and offers a few helpers
//! for running code and managing the configuration file from a shell.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pysandbox::config::{self, Config};
use pysandbox::mcp::McpServer;
use pysandbox::sandbox::{policy, ExecutionRequest, PolicyDecision, PythonExecutor};
use pysandbox::tools::{PythonCodeTool, PythonExpressionTool, ToolRegistry};
use pysandbox::VERSION;
use tracing::info;

// Per-run memory ceilings need the counting allocator.
#[cfg(not(feature = "tracking-allocator"))]
#[global_allocator]
static GLOBAL: pysandbox::sandbox::memory::TrackingAllocator =
    pysandbox::sandbox::memory::TrackingAllocator;

#[derive(Parser)]
#[command(
    name = "pysandbox-mcp",
    version = VERSION,
    about = "Sandboxed Python execution served over the Model Context Protocol",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to PYSANDBOX_CONFIG or the user config dir)
    #[arg(long, global = true, env = "PYSANDBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the tools on stdin/stdout (default)
    Serve,

    /// Execute code once and print the result as JSON
    Run {
        /// Code to execute, or "-" to read it from stdin
        code: String,
        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Memory ceiling in bytes
        #[arg(short, long)]
        memory_limit: Option<u64>,
    },

    /// Run only the static policy check
    Check {
        /// Code to check, or "-" to read it from stdin
        code: String,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Validate the configuration and print any issues
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let path = cli.config.clone().unwrap_or_else(config::config_path);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(load(&path)?).await,
        Commands::Run {
            code,
            timeout,
            memory_limit,
        } => {
            let config = load(&path)?;
            let code = read_code(code)?;
            let request = ExecutionRequest::new(code)
                .with_timeout(timeout.unwrap_or(config.sandbox.default_timeout_secs))
                .with_memory_limit(memory_limit.unwrap_or(config.sandbox.memory_limit_bytes));

            let result = tokio::task::spawn_blocking(move || {
                PythonExecutor::new(config.sandbox).map(|executor| executor.execute(&request))
            })
            .await??;

            println!("{}", result);
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Check { code } => {
            let (allowed, message) = check(&read_code(code)?);
            println!("{}", message);
            if !allowed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::InitConfig { force } => {
            init_config(&path, force)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        Commands::Validate => validate(&path),
    }
}

/// Logs go to stderr; stdout carries protocol frames only.
fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("pysandbox=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load(path: &Path) -> anyhow::Result<Config> {
    config::load_config_at(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn build_server(config: Config) -> pysandbox::Result<McpServer> {
    let timeout = config.server.tool_timeout_secs;
    let executor = Arc::new(PythonExecutor::new(config.sandbox)?);

    let mut registry = ToolRegistry::new();
    registry.register(PythonCodeTool::new(Arc::clone(&executor), timeout));
    registry.register(PythonExpressionTool::new(executor, timeout));

    Ok(McpServer::new(config.server.name, registry))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting pysandbox MCP server v{}", VERSION);
    let server = tokio::task::spawn_blocking(move || build_server(config)).await??;
    server.serve_stdio().await?;
    Ok(())
}

fn read_code(code: String) -> anyhow::Result<String> {
    if code != "-" {
        return Ok(code);
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read code from stdin")?;
    Ok(buffer)
}

fn check(code: &str) -> (bool, String) {
    match policy::check(code) {
        PolicyDecision::Allowed => (true, "OK: no blocked imports or calls found".to_string()),
        PolicyDecision::Rejected(reason) => (false, format!("Rejected: {}", reason)),
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    config::save_config(&Config::default(), path)?;
    Ok(())
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let snapshot = config::read_config_snapshot(path);
    if snapshot.exists && snapshot.config.is_none() {
        for issue in &snapshot.issues {
            println!("error: {}", issue);
        }
        std::process::exit(1);
    }

    let config = load(path)?;
    let result = config::validate_config(&config);

    for issue in result.errors.iter() {
        println!("error: {}: {}", issue.path, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("  hint: {}", suggestion);
        }
    }
    for issue in result.warnings.iter() {
        println!("warning: {}: {}", issue.path, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("  hint: {}", suggestion);
        }
    }

    if !result.valid {
        std::process::exit(1);
    }
    println!(
        "Configuration OK ({} warning(s)){}",
        result.warnings.len(),
        if snapshot.exists { "" } else { " - using defaults" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pysandbox::mcp::McpRequest;
    use tempfile::tempdir;

    #[test]
    fn test_binary_counts_allocations() {
        let block = vec![0u8; 4096];
        assert!(pysandbox::sandbox::memory::is_installed());
        drop(block);
    }

    #[test]
    fn test_check_messages() {
        assert!(check("x = 1").0);
        let (allowed, message) = check("import subprocess");
        assert!(!allowed);
        assert_eq!(message, "Rejected: import of blocked module 'subprocess'");
    }

    #[test]
    fn test_init_config_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
        assert_eq!(config::load_config_from_path(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_server_uses_configured_name() {
        let mut config = Config::default();
        config.server.name = "py-tools".into();
        let server = build_server(config).unwrap();
        assert_eq!(server.name(), "py-tools");
        assert_eq!(server.registry().count(), 2);

        let response = tokio_test::block_on(server.handle(McpRequest::call_tool(
            1,
            "execute_python_expression",
            serde_json::json!({"expression": "sum(range(5))"}),
        )))
        .unwrap();
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("\"result\":10"));
    }
}
