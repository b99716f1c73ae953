//! MCP server
//!
//! Serves a [`ToolRegistry`] to an MCP client as JSON-RPC 2.0 over
//! newline-delimited frames. Only protocol frames are written to the output
//! stream; logging goes elsewhere.

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use super::protocol::{
    error_codes, CallToolParams, McpRequest, McpResponse, McpTool, McpToolResult, PROTOCOL_VERSION,
};
use crate::error::{Error, Result};
use crate::tools::{ToolCall, ToolRegistry};

/// MCP server exposing registered tools
pub struct McpServer {
    name: String,
    version: String,
    registry: ToolRegistry,
}

impl McpServer {
    pub fn new(name: impl Into<String>, registry: ToolRegistry) -> Self {
        McpServer {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            registry,
        }
    }

    /// Get the server name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one decoded request. Notifications yield no response.
    pub async fn handle(&self, request: McpRequest) -> Option<McpResponse> {
        debug!(method = %request.method, "MCP request");

        if request.is_notification() {
            if !request.method.starts_with("notifications/") {
                debug!(method = %request.method, "Ignoring notification for unknown method");
            }
            return None;
        }

        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => McpResponse::success(id, self.initialize_result()),
            "ping" => McpResponse::success(id, json!({})),
            "tools/list" => McpResponse::success(id, self.list_tools()),
            "tools/call" => match self.call_tool(request.params).await {
                Ok(result) => McpResponse::success(id, result),
                Err(e) => McpResponse::error(id, error_codes::INVALID_PARAMS, e.to_string()),
            },
            other => McpResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ),
        };

        Some(response)
    }

    /// Decode and handle one frame
    pub async fn handle_line(&self, line: &str) -> Option<McpResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Malformed MCP frame: {}", e);
                return Some(McpResponse::error(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        let id = value.get("id").cloned();
        match serde_json::from_value::<McpRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => Some(McpResponse::error(
                id,
                error_codes::INVALID_REQUEST,
                format!("Invalid request: {}", e),
            )),
        }
    }

    /// Serve frames from `reader` until it closes, writing responses to `writer`.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_line(&line).await {
                let mut frame = serde_json::to_string(&response)?;
                frame.push('\n');
                writer.write_all(frame.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        info!("MCP client closed the connection");
        Ok(())
    }

    /// Serve over the process's stdin and stdout
    pub async fn serve_stdio(&self) -> Result<()> {
        info!(server = %self.name, tools = self.registry.count(), "MCP server listening on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": self.name,
                "version": self.version
            }
        })
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<McpTool> = self
            .registry
            .definitions()
            .into_iter()
            .map(McpTool::from)
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| Error::InvalidInput(format!("Invalid tools/call params: {}", e)))?;
        let name = params.name;

        let result = if self.registry.get(&name).is_none() {
            warn!(tool = %name, "Call to unknown tool");
            McpToolResult::text(
                format!("Error executing {}: Unknown tool: {}", name, name),
                true,
            )
        } else {
            let call = ToolCall {
                id: String::new(),
                name: name.clone(),
                arguments: params.arguments.unwrap_or_else(|| json!({})),
            };
            match self.registry.execute(&call).await {
                Ok(outcome) if outcome.success => {
                    McpToolResult::text(outcome.content.unwrap_or_default(), false)
                }
                Ok(outcome) => McpToolResult::text(
                    format!("Error executing {}: {}", name, outcome.error.unwrap_or_default()),
                    true,
                ),
                Err(e) if e.is_client_error() => {
                    debug!(tool = %name, "Rejected tool arguments: {}", e);
                    McpToolResult::text(format!("Error executing {}: {}", name, e), true)
                }
                Err(e) => {
                    error!(tool = %name, retryable = e.is_retryable(), "Error executing tool: {}", e);
                    McpToolResult::text(format!("Error executing {}: {}", name, e), true)
                }
            }
        };

        Ok(serde_json::to_value(result)?)
    }
}
