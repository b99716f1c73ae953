//! MCP (Model Context Protocol) module
//!
//! Serves the execution tools to MCP clients over stdio.
//!
//! ## Architecture
//!
//! - **protocol**: Wire protocol types (JSON-RPC based)
//! - **server**: Request dispatch and the stdio transport
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pysandbox::config::SandboxConfig;
//! use pysandbox::mcp::McpServer;
//! use pysandbox::sandbox::PythonExecutor;
//! use pysandbox::tools::{PythonCodeTool, ToolRegistry};
//!
//! # async fn example() -> pysandbox::Result<()> {
//! let executor = Arc::new(PythonExecutor::new(SandboxConfig::default())?);
//! let mut registry = ToolRegistry::new();
//! registry.register(PythonCodeTool::new(executor, 10));
//!
//! McpServer::new("python-interpreter", registry).serve_stdio().await?;
//! # Ok(())
//! # }
//! ```

mod protocol;
mod server;

pub use protocol::{
    error_codes, CallToolParams, McpContent, McpError, McpRequest, McpResponse, McpTool,
    McpToolResult, PROTOCOL_VERSION,
};
pub use server::McpServer;
