//! Sequential executor: ordered stages over a shared state.
//!
//! Each stage reads its input from the state, runs, and commits its output
//! under its output key before the next stage starts. The first failure
//! aborts the chain and is returned unchanged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, info};

use flowline_core::error::Result;

use crate::state::WorkflowState;
use crate::step::{execute, Step};

/// How a stage builds its request from the current state.
#[derive(Debug, Clone)]
pub enum InputMapping {
    /// The whole state as an object.
    State,
    /// An object holding just these keys.
    Keys(Vec<String>),
    /// The raw value stored under one key.
    Key(String),
}

impl InputMapping {
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Keys(keys.into_iter().map(Into::into).collect())
    }

    fn build(&self, state: &WorkflowState) -> Result<Value> {
        match self {
            Self::State => Ok(state.to_value()),
            Self::Keys(keys) => state.select(keys),
            Self::Key(key) => state.select(std::slice::from_ref(key)).map(|mut v| v[key.as_str()].take()),
        }
    }
}

/// One stage: a step, where its input comes from, where its output goes.
pub struct Stage {
    pub step: Arc<dyn Step>,
    pub input: InputMapping,
    pub output_key: String,
}

/// An ordered pipeline of stages. A chain is itself a [`Step`], so chains nest.
pub struct Chain {
    name: String,
    stages: Vec<Stage>,
    default_timeout: Duration,
    outputs: Option<Vec<String>>,
}

impl Chain {
    pub fn new(name: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            default_timeout,
            outputs: None,
        }
    }

    /// Append a stage.
    pub fn stage(
        mut self,
        step: impl Step,
        input: InputMapping,
        output_key: impl Into<String>,
    ) -> Self {
        self.stages.push(Stage {
            step: Arc::new(step),
            input,
            output_key: output_key.into(),
        });
        self
    }

    /// Restrict the value returned when the chain runs as a step.
    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order over `state` and return the final state.
    pub async fn run_state(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        let start = Instant::now();
        info!(chain = %self.name, stages = self.stages.len(), "Starting chain");

        for (index, stage) in self.stages.iter().enumerate() {
            let step_name = stage.step.name().to_string();
            let input = stage.input.build(&state).map_err(|e| {
                error!(chain = %self.name, stage = index, step = %step_name, error = %e, "Stage input unavailable");
                e
            })?;

            info!(chain = %self.name, stage = index, step = %step_name, "Running stage");
            match execute(stage.step.as_ref(), input, self.default_timeout).await {
                Ok(output) => state.set(stage.output_key.clone(), output),
                Err(e) => {
                    error!(
                        chain = %self.name,
                        stage = index,
                        step = %step_name,
                        error = %e,
                        "Stage failed, aborting chain"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            chain = %self.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chain complete"
        );
        Ok(state)
    }
}

impl Step for Chain {
    fn name(&self) -> &str {
        &self.name
    }

    /// Budget for the whole chain: the sum of the stage budgets, each stage
    /// using its own timeout or the chain default.
    fn timeout(&self) -> Option<Duration> {
        if self.stages.is_empty() {
            return Some(self.default_timeout);
        }
        let total = self
            .stages
            .iter()
            .map(|stage| stage.step.timeout().unwrap_or(self.default_timeout))
            .fold(Duration::ZERO, Duration::saturating_add);
        Some(total)
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let state = self.run_state(WorkflowState::from_value(input)).await?;
            match &self.outputs {
                Some(keys) => state.select(keys),
                None => Ok(state.to_value()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use flowline_core::ErrorKind;
    use flowline_test_utils::{CountingStep, FailStep, ScriptedModel};

    use super::*;
    use crate::step::{FnStep, ModelStep};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn upper(name: &str) -> impl Step {
        FnStep::new(name.to_string(), |input: Value| async move {
            let text = input.as_str().unwrap_or_default().to_uppercase();
            Ok(Value::String(text))
        })
    }

    #[tokio::test]
    async fn stages_see_committed_outputs() {
        let chain = Chain::new("shout", TIMEOUT)
            .stage(upper("first"), InputMapping::Key("input".into()), "a")
            .stage(
                FnStep::new("join", |input: Value| async move {
                    Ok(json!(format!("{}!", input["a"].as_str().unwrap_or_default())))
                }),
                InputMapping::keys(["a"]),
                "b",
            );

        let state = chain
            .run_state(WorkflowState::from_value(json!("hi")))
            .await
            .unwrap();
        assert_eq!(state.get_str("a"), Some("HI"));
        assert_eq!(state.get_str("b"), Some("HI!"));
    }

    #[tokio::test]
    async fn failure_aborts_remaining_stages() {
        let after = CountingStep::new("after");
        let chain = Chain::new("broken", TIMEOUT)
            .stage(FailStep::new("validate", "HTTP 503"), InputMapping::State, "x")
            .stage(after.clone(), InputMapping::State, "y");

        let err = chain.run_state(WorkflowState::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn unwritten_key_is_invalid_input() {
        let chain = Chain::new("bad-map", TIMEOUT).stage(
            upper("u"),
            InputMapping::Key("outline".into()),
            "out",
        );
        let err = chain.run_state(WorkflowState::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn outline_validate_draft_chain() {
        let model = Arc::new(ScriptedModel::new([
            "- tides\n- moon",
            "YES",
            "Full article",
        ]));
        let chain = Chain::new("article", TIMEOUT)
            .stage(
                ModelStep::new("outline", model.clone(), "Write a 5-bullet outline for an article on {topic}."),
                InputMapping::keys(["topic"]),
                "outline",
            )
            .stage(
                ModelStep::new("validate", model.clone(), "Does this outline cover key points?\n{outline}"),
                InputMapping::keys(["outline"]),
                "validation",
            )
            .stage(
                ModelStep::new("draft", model.clone(), "Write the full article based on this outline:\n{outline}"),
                InputMapping::keys(["outline"]),
                "article",
            )
            .with_outputs(["outline", "validation", "article"]);

        let out = execute(&chain, json!({"topic": "tides"}), TIMEOUT).await.unwrap();
        assert_eq!(out["validation"], "YES");
        assert_eq!(out["article"], "Full article");
        assert!(out.get("topic").is_none());

        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].messages[0].text().contains("- tides\n- moon"));
    }

    #[tokio::test]
    async fn chains_nest() {
        let inner = Chain::new("inner", TIMEOUT)
            .stage(upper("u"), InputMapping::Key("input".into()), "loud")
            .with_outputs(["loud"]);
        let outer = Chain::new("outer", TIMEOUT).stage(inner, InputMapping::State, "nested");

        let state = outer
            .run_state(WorkflowState::from_value(json!("quiet")))
            .await
            .unwrap();
        assert_eq!(state.get("nested"), Some(&json!({"loud": "QUIET"})));
    }

    #[tokio::test(start_paused = true)]
    async fn nested_budget_honors_longer_stage_timeouts() {
        let slow = FnStep::new("slow", |input: Value| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(input)
        })
        .with_timeout(Duration::from_secs(10));
        let inner = Chain::new("inner", Duration::from_secs(1))
            .stage(slow, InputMapping::Key("input".into()), "slow")
            .stage(upper("u"), InputMapping::Key("slow".into()), "loud")
            .with_outputs(["loud"]);
        assert_eq!(inner.timeout(), Some(Duration::from_secs(11)));

        let outer = Chain::new("outer", Duration::from_secs(1)).stage(inner, InputMapping::State, "nested");
        let state = outer
            .run_state(WorkflowState::from_value(json!("late")))
            .await
            .unwrap();
        assert_eq!(state.get("nested"), Some(&json!({"loud": "LATE"})));
    }

    #[test]
    fn empty_chain_budget_is_the_default() {
        let chain = Chain::new("empty", TIMEOUT);
        assert_eq!(chain.timeout(), Some(TIMEOUT));
        let two = Chain::new("two", TIMEOUT)
            .stage(upper("a"), InputMapping::State, "a")
            .stage(upper("b"), InputMapping::State, "b");
        assert_eq!(two.timeout(), Some(TIMEOUT * 2));
    }
}
