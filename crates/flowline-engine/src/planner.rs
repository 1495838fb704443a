//! Planner/worker decomposition.
//!
//! A planning step turns a goal into list-shaped text; [`parse_plan`] pulls
//! the tasks out and each task runs as its own worker invocation through
//! [`FanOut`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use flowline_core::error::Result;

use crate::fanout::FanOut;
use crate::step::{execute, Step};

fn list_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\d+\.|-|•)").expect("list marker pattern is valid"))
}

/// Extract tasks from planning text.
///
/// Recognized lines (after trimming) start with `N.`, `-` or `•`. The
/// marker is stripped and the rest trimmed; empty remainders and any other
/// lines are dropped.
pub fn parse_plan(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| {
            let marker = list_marker().find(line)?;
            let task = line[marker.end()..].trim();
            (!task.is_empty()).then(|| task.to_string())
        })
        .collect()
}

/// One task and what its worker produced.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: String,
    pub outcome: Result<Value>,
}

#[derive(Debug)]
pub struct Orchestration {
    pub plan: Vec<String>,
    pub results: Vec<TaskOutcome>,
}

pub struct PlannerWorker {
    planner: Arc<dyn Step>,
    worker: Arc<dyn Step>,
    fanout: FanOut,
    default_timeout: Duration,
}

impl PlannerWorker {
    pub fn new(planner: impl Step, worker: impl Step, fanout: FanOut, default_timeout: Duration) -> Self {
        Self {
            planner: Arc::new(planner),
            worker: Arc::new(worker),
            fanout,
            default_timeout,
        }
    }

    /// Plan `goal`, then run one worker per task.
    ///
    /// A planner failure aborts the run. Worker failures are kept per task.
    pub async fn run(&self, goal: &str) -> Result<Orchestration> {
        info!(planner = %self.planner.name(), "Planning");
        let planned = execute(self.planner.as_ref(), json!({ "goal": goal }), self.default_timeout).await?;

        let plan = match planned.as_str() {
            Some(text) => parse_plan(text),
            None => {
                warn!(output = %planned, "Planner output is not text, using an empty plan");
                Vec::new()
            }
        };
        info!(tasks = plan.len(), "Plan parsed");

        let inputs = plan.iter().map(|task| json!({ "task": task })).collect();
        let outcomes = self.fanout.map(self.worker.clone(), inputs).await;

        let results = plan
            .iter()
            .cloned()
            .zip(outcomes)
            .map(|(task, outcome)| TaskOutcome { task, outcome })
            .collect();

        Ok(Orchestration { plan, results })
    }
}

#[cfg(test)]
mod tests {
    use flowline_core::ErrorKind;
    use flowline_test_utils::{FailStep, ScriptedModel};

    use super::*;
    use crate::step::{FnStep, ModelStep};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn parses_numbered_and_bulleted_lines() {
        let text = "Here is the plan:\n1. Research frameworks\n  2.  Compare features \n- Write report\n• Review\nThanks!";
        assert_eq!(
            parse_plan(text),
            vec!["Research frameworks", "Compare features", "Write report", "Review"]
        );
    }

    #[test]
    fn ignores_empty_items_and_prose() {
        assert!(parse_plan("1.\n-   \nNo list here\n\n* star bullets are not recognized").is_empty());
        assert!(parse_plan("").is_empty());
    }

    #[test]
    fn multi_digit_numbers() {
        assert_eq!(parse_plan("12. twelfth"), vec!["twelfth"]);
        assert!(parse_plan("12) twelfth").is_empty());
    }

    #[test]
    fn parsing_is_idempotent() {
        let text = "1. a\n- b\n• c\nnoise";
        assert_eq!(parse_plan(text), parse_plan(text));
    }

    fn worker() -> impl Step {
        FnStep::new("worker", |input: Value| async move {
            let task = input["task"].as_str().unwrap_or_default().to_string();
            if task.contains("fail") {
                Err(flowline_core::FlowError::ModelRequest("HTTP 500".into()))
            } else {
                Ok(json!(format!("done: {}", task)))
            }
        })
    }

    #[tokio::test]
    async fn runs_one_worker_per_task_in_order() {
        let model = Arc::new(ScriptedModel::new(["1. alpha\n2. please fail\n3. gamma"]));
        let planner = ModelStep::new("planner", model, "Goal: {goal}");
        let pw = PlannerWorker::new(planner, worker(), FanOut::new(TIMEOUT), TIMEOUT);

        let run = pw.run("ship it").await.unwrap();
        assert_eq!(run.plan, vec!["alpha", "please fail", "gamma"]);
        assert_eq!(run.results.len(), 3);
        assert_eq!(run.results[0].outcome.as_ref().unwrap(), &json!("done: alpha"));
        assert_eq!(
            run.results[1].outcome.as_ref().unwrap_err().kind(),
            ErrorKind::UpstreamFailure
        );
        assert_eq!(run.results[2].task, "gamma");
    }

    #[tokio::test]
    async fn unstructured_plan_is_empty_not_error() {
        let model = Arc::new(ScriptedModel::new(["I cannot break this down."]));
        let pw = PlannerWorker::new(
            ModelStep::new("planner", model, "Goal: {goal}"),
            worker(),
            FanOut::new(TIMEOUT),
            TIMEOUT,
        );
        let run = pw.run("vague").await.unwrap();
        assert!(run.plan.is_empty());
        assert!(run.results.is_empty());
    }

    #[tokio::test]
    async fn non_text_plan_degrades_to_empty() {
        let planner = FnStep::new("planner", |_| async { Ok(json!({"tasks": 3})) });
        let pw = PlannerWorker::new(planner, worker(), FanOut::new(TIMEOUT), TIMEOUT);
        assert!(pw.run("x").await.unwrap().plan.is_empty());
    }

    #[tokio::test]
    async fn planner_failure_aborts() {
        let pw = PlannerWorker::new(
            FailStep::new("planner", "HTTP 503"),
            worker(),
            FanOut::new(TIMEOUT),
            TIMEOUT,
        );
        assert!(pw.run("x").await.is_err());
    }
}
