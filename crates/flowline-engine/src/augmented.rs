//! Augmented single call: one model conversation with tools bound.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use flowline_core::config::WorkflowConfig;
use flowline_core::error::{FlowError, Result};
use flowline_core::traits::ModelClient;
use flowline_core::types::{ChatMessage, ModelRequest, ModelTier};
use flowline_tools::ToolRegistry;

use crate::dispatch::dispatch_tool_calls;
use crate::log::ConversationLog;
use crate::step::guarded;

const DEFAULT_SYSTEM: &str = "Answer the user's question. Use the available tools for \
arithmetic and factual lookups instead of guessing.";

#[derive(Debug, Clone)]
pub struct Augmented {
    pub answer: String,
    pub turns: usize,
    pub log: ConversationLog,
}

/// Call the model, run any tools it asks for, feed results back, repeat
/// until it answers in plain text or `max_turns` is used up.
pub struct ToolLoop {
    client: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    tier: ModelTier,
    system: String,
    max_turns: usize,
    step_timeout: Duration,
}

impl ToolLoop {
    pub fn new(client: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>, max_turns: usize) -> Self {
        Self {
            client,
            registry,
            tier: ModelTier::Fast,
            system: DEFAULT_SYSTEM.to_string(),
            max_turns,
            step_timeout: WorkflowConfig::default().step_timeout(),
        }
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    /// Deadline for each model turn.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub async fn run(&self, query: &str) -> Result<Augmented> {
        let mut log = ConversationLog::new();
        log.push(ChatMessage::user(query));
        let tools = self.registry.definitions();

        for turn in 1..=self.max_turns {
            let request =
                ModelRequest::new(log.with_system(self.system.clone()), self.tier).with_tools(tools.clone());
            let response = guarded("augment", self.step_timeout, self.client.complete(request)).await?;
            log.push(response.to_message());

            if response.tool_calls.is_empty() {
                info!(turns = turn, "Model answered");
                return Ok(Augmented {
                    answer: response.text.trim().to_string(),
                    turns: turn,
                    log,
                });
            }

            debug!(turn, tool_calls = response.tool_calls.len(), "Model requested tools");
            let results = dispatch_tool_calls(&self.registry, &response.tool_calls).await;
            log.extend(results);
        }

        warn!(max_turns = self.max_turns, "Tool loop did not converge");
        Err(FlowError::MaxTurnsExceeded(self.max_turns))
    }
}
