use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Model-call capability passed explicitly into every executor.
pub trait ModelClient: Send + Sync + 'static {
    /// Send one request and wait for the complete response.
    fn complete(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>>;
}

/// A named callable the agent may invoke through the registry.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// A named asynchronous unit of work over JSON payloads.
///
/// Steps are stateless between invocations. Executors call them through
/// `flowline_engine::step::execute`, which applies the timeout and turns
/// panics into failures.
pub trait Step: Send + Sync + 'static {
    /// Identifier used in logs and tier overrides.
    fn name(&self) -> &str;

    /// Step-specific timeout. `None` falls back to the workflow default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn run(&self, input: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>>;
}
