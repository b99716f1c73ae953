//! Python execution tools
//!
//! Expose a [`PythonExecutor`] session as protocol tools. The engine is
//! synchronous, so every call runs on tokio's blocking pool and never on the
//! async runtime's worker threads.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::traits::{parse_arguments, Tool, ToolResult};
use crate::error::{Error, Result};
use crate::sandbox::{ExecutionRequest, ExecutionResult, PythonExecutor};

#[derive(Debug, Deserialize)]
struct CodeArgs {
    #[serde(default)]
    code: String,
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ExpressionArgs {
    #[serde(default)]
    expression: String,
    timeout: Option<u64>,
}

/// Built-in tool: execute a Python script
pub struct PythonCodeTool {
    executor: Arc<PythonExecutor>,
    default_timeout: u64,
}

impl PythonCodeTool {
    pub fn new(executor: Arc<PythonExecutor>, default_timeout: u64) -> Self {
        PythonCodeTool {
            executor,
            default_timeout,
        }
    }
}

#[async_trait]
impl Tool for PythonCodeTool {
    fn name(&self) -> &str {
        "execute_python_code"
    }

    fn description(&self) -> &str {
        "Executes Python code and returns structured results including output, errors, and success status. \
         Captures print statements and provides detailed error tracebacks when execution fails."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Complete Python script to execute. Can be multiple lines of code."
                },
                "timeout": {
                    "type": "integer",
                    "description": format!("Execution timeout in seconds (default: {}).", self.default_timeout)
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let args: CodeArgs = parse_arguments(args)?;
        let code = required("code", args.code)?;

        let request = ExecutionRequest::new(code)
            .with_timeout(args.timeout.unwrap_or(self.default_timeout))
            .with_memory_limit(self.executor.config().memory_limit_bytes);

        let executor = Arc::clone(&self.executor);
        let result = run_blocking(move || executor.execute(&request)).await?;
        Ok(to_tool_result(result))
    }
}

/// Built-in tool: evaluate one Python expression
pub struct PythonExpressionTool {
    executor: Arc<PythonExecutor>,
    default_timeout: u64,
}

impl PythonExpressionTool {
    pub fn new(executor: Arc<PythonExecutor>, default_timeout: u64) -> Self {
        PythonExpressionTool {
            executor,
            default_timeout,
        }
    }
}

#[async_trait]
impl Tool for PythonExpressionTool {
    fn name(&self) -> &str {
        "execute_python_expression"
    }

    fn description(&self) -> &str {
        "Evaluates a single Python expression and returns the computed value."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Python expression to evaluate. Can only be a single line of code."
                },
                "timeout": {
                    "type": "integer",
                    "description": format!("Evaluation timeout in seconds (default: {}).", self.default_timeout)
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let args: ExpressionArgs = parse_arguments(args)?;
        let expression = required("expression", args.expression)?;
        let timeout = args.timeout.unwrap_or(self.default_timeout);

        let executor = Arc::clone(&self.executor);
        let result = run_blocking(move || executor.evaluate(&expression, timeout)).await?;
        Ok(to_tool_result(result))
    }
}

fn required(key: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("'{}' parameter is required", key)));
    }
    Ok(value)
}

async fn run_blocking<F>(f: F) -> Result<ExecutionResult>
where
    F: FnOnce() -> ExecutionResult + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Execution task failed: {}", e)))
}

/// A failed run is still a successful tool call; the failure is in the text.
fn to_tool_result(result: ExecutionResult) -> ToolResult {
    debug!(success = result.success, "Python tool call finished");
    let metadata = json!({ "success": result.success });
    ToolResult::success_with_metadata(result.to_string(), metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;

    fn executor() -> Arc<PythonExecutor> {
        Arc::new(PythonExecutor::new(SandboxConfig::default()).unwrap())
    }

    fn parsed(result: &ToolResult) -> Value {
        serde_json::from_str(result.content.as_deref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_code_tool_returns_result_text() {
        let tool = PythonCodeTool::new(executor(), 10);
        let result = tool
            .execute(json!({"code": "print('hi')\n2 + 3"}))
            .await
            .unwrap();

        assert!(result.success);
        let value = parsed(&result);
        assert_eq!(value["success"], true);
        assert_eq!(value["output"], "hi\n");
        assert_eq!(value["result"], 5);
        assert_eq!(value["error"], Value::Null);
    }

    #[tokio::test]
    async fn test_failed_run_is_reported_in_text() {
        let tool = PythonCodeTool::new(executor(), 10);
        let result = tool.execute(json!({"code": "import socket"})).await.unwrap();

        assert!(result.success);
        assert_eq!(result.metadata, Some(json!({"success": false})));
        let value = parsed(&result);
        assert_eq!(
            value["error"],
            "SecurityError: Unsafe code detected - import of blocked module 'socket'"
        );
    }

    #[tokio::test]
    async fn test_tools_share_the_session() {
        let session = executor();
        let code = PythonCodeTool::new(Arc::clone(&session), 10);
        let expression = PythonExpressionTool::new(session, 10);

        code.execute(json!({"code": "radius = 3"})).await.unwrap();
        let result = expression
            .execute(json!({"expression": "radius * 2", "timeout": 2}))
            .await
            .unwrap();
        assert_eq!(parsed(&result)["result"], 6);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let tool = PythonCodeTool::new(executor(), 10);
        assert!(matches!(
            tool.execute(json!({})).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            tool.execute(json!({"code": "   "})).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            tool.execute(json!({"code": "1", "timeout": "soon"})).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            tool.execute(json!({"code": "1", "timeout": -2})).await,
            Err(Error::InvalidInput(_))
        ));

        let expression = PythonExpressionTool::new(executor(), 10);
        match expression.execute(json!({"timeout": 1})).await {
            Err(Error::InvalidInput(message)) => {
                assert_eq!(message, "'expression' parameter is required")
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.success)),
        }
    }

    #[tokio::test]
    async fn test_null_timeout_uses_default() {
        let tool = PythonCodeTool::new(executor(), 10);
        let result = tool
            .execute(json!({"code": "3 * 3", "timeout": null}))
            .await
            .unwrap();
        assert_eq!(parsed(&result)["result"], 9);
    }

    #[test]
    fn test_schemas() {
        let tool = PythonCodeTool::new(executor(), 7);
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], json!(["code"]));
        assert_eq!(schema["properties"]["timeout"]["type"], "integer");

        let definition = tool.to_definition();
        assert_eq!(definition.function.name, "execute_python_code");
    }
}
