//! Tools module - Protocol-facing tool system
//!
//! Each tool is a self-contained module that implements the `Tool` trait.
//! Tools are registered into a `ToolRegistry` and served to protocol
//! clients for discovery and invocation.
//!
//! ## Built-in Tools
//!
//! - **execute_python_code**: Run a Python script in the session
//! - **execute_python_expression**: Evaluate one expression against the session

mod python;
mod registry;
mod traits;

// Core trait and types
pub use traits::{
    parse_arguments, FunctionDefinition, Tool, ToolCall, ToolDefinition, ToolResult,
};

// Registry
pub use registry::ToolRegistry;

// Built-in tools
pub use python::{PythonCodeTool, PythonExpressionTool};
