use futures::future::join_all;
use tracing::{info, warn};

use flowline_core::error::FlowError;
use flowline_core::types::{ChatMessage, ToolCall};
use flowline_tools::ToolRegistry;

/// Invoke every requested tool and render each outcome as a tool message.
///
/// Calls run concurrently; messages come back in request order. Unknown
/// tools and tool failures become error results rather than errors, so the
/// model can see what went wrong and try something else.
pub async fn dispatch_tool_calls(registry: &ToolRegistry, calls: &[ToolCall]) -> Vec<ChatMessage> {
    let futures = calls.iter().map(|call| async move {
        info!(tool = %call.name, call_id = %call.id, "Dispatching tool call");
        match registry.call(&call.name, call.args.clone()).await {
            Ok(result) => ChatMessage::tool_result(&call.id, result.content, result.is_error),
            Err(FlowError::UnknownTool(name)) => {
                warn!(tool = %name, "Model requested an unregistered tool");
                ChatMessage::tool_result(
                    &call.id,
                    format!("Error: unknown tool '{}'. Available tools: {}", name, registry.list().join(", ")),
                    true,
                )
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                ChatMessage::tool_result(&call.id, format!("Error: {}", e), true)
            }
        }
    });
    join_all(futures).await
}
