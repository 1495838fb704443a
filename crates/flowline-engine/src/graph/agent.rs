//! The tool-using agent graph: plan → {tools | analyze} → {plan | end}.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use flowline_core::config::WorkflowConfig;
use flowline_core::error::{FlowError, Result};
use flowline_core::traits::ModelClient;
use flowline_core::types::{ChatMessage, ModelRequest, ModelTier, ToolCall};
use flowline_llm::structured::{invoke_structured, StructuredOutput};
use flowline_tools::ToolRegistry;

use super::executor::{Graph, Node, Transition};
use crate::dispatch::dispatch_tool_calls;
use crate::log::ConversationLog;
use crate::step::guarded;

pub const PLAN: &str = "plan";
pub const TOOLS: &str = "tools";
pub const ANALYZE: &str = "analyze";

/// Mutable state threaded through the agent graph.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub goal: String,
    pub log: ConversationLog,
    /// Plan cycles run so far. Only the plan node increments it.
    pub iteration: u32,
    pub max_iterations: u32,
    pub completed: bool,
    /// Tool calls requested by the latest plan, consumed by the tools node.
    pub pending: Vec<ToolCall>,
    pub analysis: Option<String>,
}

impl AgentState {
    pub fn new(goal: impl Into<String>, max_iterations: u32) -> Self {
        let goal = goal.into();
        let mut log = ConversationLog::new();
        log.push(ChatMessage::user(format!("Help me with this goal: {}", goal)));
        Self {
            goal,
            log,
            iteration: 0,
            max_iterations,
            completed: false,
            pending: Vec::new(),
            analysis: None,
        }
    }
}

/// Verdict returned by the analyze node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub analysis: String,
    pub completed: bool,
}

impl StructuredOutput for Analysis {
    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "analysis": {"type": "string", "description": "Summary of progress toward the goal"},
                "completed": {"type": "boolean", "description": "True when the goal has been met"}
            },
            "required": ["analysis", "completed"]
        })
    }
}

const PLAN_PROMPT: &str = "You are an autonomous agent working toward a goal.\n\n\
Your goal: {goal}\n\n\
You can call the tools provided to you. Based on the conversation so far, decide \
what action to take next. If suitable results have already been found, say so \
without calling a tool.";

const ANALYZE_PROMPT: &str = "Analyze the results gathered so far and decide whether \
they meet the goal: {goal}\n\n\
If they do, summarize the suitable options and set completed to true. If not, \
explain what to try next and set completed to false.";

struct PlanNode {
    client: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    tier: ModelTier,
    timeout: Duration,
}

impl Node<AgentState> for PlanNode {
    fn name(&self) -> &str {
        PLAN
    }

    fn run<'a>(&'a self, state: &'a mut AgentState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let system = PLAN_PROMPT.replace("{goal}", &state.goal);
            let request = ModelRequest::new(state.log.with_system(system), self.tier)
                .with_tools(self.registry.definitions());
            let response = guarded(PLAN, self.timeout, self.client.complete(request)).await?;

            state.log.push(response.to_message());
            state.pending = response.tool_calls;
            state.iteration += 1;
            info!(
                iteration = state.iteration,
                tool_calls = state.pending.len(),
                "Agent planned"
            );
            Ok(())
        })
    }
}

struct ToolsNode {
    registry: Arc<ToolRegistry>,
}

impl Node<AgentState> for ToolsNode {
    fn name(&self) -> &str {
        TOOLS
    }

    fn run<'a>(&'a self, state: &'a mut AgentState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let calls = std::mem::take(&mut state.pending);
            let results = dispatch_tool_calls(&self.registry, &calls).await;
            state.log.extend(results);
            Ok(())
        })
    }
}

struct AnalyzeNode {
    client: Arc<dyn ModelClient>,
    tier: ModelTier,
    timeout: Duration,
}

impl Node<AgentState> for AnalyzeNode {
    fn name(&self) -> &str {
        ANALYZE
    }

    fn run<'a>(&'a self, state: &'a mut AgentState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut messages = state
                .log
                .with_system(ANALYZE_PROMPT.replace("{goal}", &state.goal));
            messages.push(ChatMessage::user(
                "Based on the current results, have we achieved the goal? Provide analysis.",
            ));
            let verdict: Analysis = guarded(
                ANALYZE,
                self.timeout,
                invoke_structured(self.client.as_ref(), messages, self.tier),
            )
            .await?;

            info!(
                iteration = state.iteration,
                completed = verdict.completed,
                "Agent analyzed progress"
            );
            state.log.push(ChatMessage::assistant_text(verdict.analysis.clone()));
            state.completed = verdict.completed;
            state.analysis = Some(verdict.analysis);
            Ok(())
        })
    }
}

/// Knobs for [`Agent`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub max_steps: usize,
    pub plan_tier: ModelTier,
    pub analyze_tier: ModelTier,
    /// Deadline for each plan or analyze model call.
    pub step_timeout: Duration,
}

impl AgentSettings {
    /// Settings from `config`; an explicit `max_iterations` overrides
    /// `config.max_iterations`.
    pub fn from_config(config: &WorkflowConfig, max_iterations: Option<u32>) -> Self {
        Self {
            max_iterations: max_iterations.unwrap_or(config.max_iterations),
            max_steps: config.max_steps,
            plan_tier: config.tier_for(PLAN, ModelTier::Fast),
            analyze_tier: config.tier_for(ANALYZE, ModelTier::Fast),
            step_timeout: config.step_timeout(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default(), Some(5))
    }
}

/// Final result of an agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub log: ConversationLog,
    pub iterations: u32,
    pub completed: bool,
    pub analysis: Option<String>,
    pub path: Vec<String>,
}

pub struct Agent {
    graph: Graph<AgentState>,
    max_iterations: u32,
}

impl Agent {
    pub fn new(client: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>, settings: AgentSettings) -> Self {
        let max_iterations = settings.max_iterations;
        // Each cycle visits at most three nodes.
        let max_steps = settings
            .max_steps
            .max(3 * max_iterations as usize + 1);

        let graph = Graph::new(PLAN, max_steps)
            .add_node(PlanNode {
                client: client.clone(),
                registry: registry.clone(),
                tier: settings.plan_tier,
                timeout: settings.step_timeout,
            })
            .add_node(ToolsNode { registry })
            .add_node(AnalyzeNode {
                client,
                tier: settings.analyze_tier,
                timeout: settings.step_timeout,
            })
            .add_conditional_edge(PLAN, |s: &AgentState| {
                if s.pending.is_empty() {
                    Transition::to(ANALYZE)
                } else {
                    Transition::to(TOOLS)
                }
            })
            .add_edge(TOOLS, Transition::to(ANALYZE))
            .add_conditional_edge(ANALYZE, |s: &AgentState| {
                if s.completed || s.iteration >= s.max_iterations {
                    Transition::End
                } else {
                    Transition::to(PLAN)
                }
            });

        Self {
            graph,
            max_iterations,
        }
    }

    /// Run the graph toward `goal`. The plan node runs at most
    /// `max_iterations` times, so a limit of zero is rejected.
    pub async fn run(&self, goal: &str) -> Result<AgentOutcome> {
        if self.max_iterations == 0 {
            return Err(FlowError::InvalidInput(
                "agent max_iterations must be at least 1".into(),
            ));
        }
        info!(goal = %goal, max_iterations = self.max_iterations, "Starting agent");
        let run = self
            .graph
            .run(AgentState::new(goal, self.max_iterations))
            .await?;
        let state = run.state;
        info!(
            iterations = state.iteration,
            completed = state.completed,
            "Agent finished"
        );
        Ok(AgentOutcome {
            log: state.log,
            iterations: state.iteration,
            completed: state.completed,
            analysis: state.analysis,
            path: run.path,
        })
    }
}
