//! Patterns composed with each other through the public API, driven by a
//! scripted model.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use flowline_core::config::{RoutingConfig, WorkflowConfig};
use flowline_core::types::{ModelRequest, ModelResponse, ModelTier};
use flowline_engine::{
    Chain, ConvergenceLoop, ConvergenceSettings, Critique, FanOut, Improvement, InputMapping,
    ModelStep, PlannerWorker, RoutedPipelines, Router,
};
use flowline_test_utils::ScriptedModel;

const TIMEOUT: Duration = Duration::from_secs(5);

fn last_user_text(request: &ModelRequest) -> String {
    request
        .messages
        .last()
        .map(|m| m.text().to_string())
        .unwrap_or_default()
}

#[tokio::test]
async fn routed_query_runs_a_nested_chain() {
    let model = Arc::new(ScriptedModel::with_handler(|req| {
        let prompt = last_user_text(req);
        let reply = if prompt.starts_with("Outline:") {
            "- handshake\n- certificates"
        } else if prompt.starts_with("Expand:") {
            "A long article about TLS."
        } else {
            "short answer"
        };
        Ok(ModelResponse::text(reply))
    }));

    let smart = Chain::new("smart", TIMEOUT)
        .stage(
            ModelStep::new("outline", model.clone(), "Outline: {query}").with_tier(ModelTier::Smart),
            InputMapping::keys(["query"]),
            "outline",
        )
        .stage(
            ModelStep::new("expand", model.clone(), "Expand: {outline}").with_tier(ModelTier::Smart),
            InputMapping::keys(["outline"]),
            "article",
        )
        .with_outputs(["article"]);
    let fast = ModelStep::new("fast", model.clone(), "{query}");

    let pipelines = RoutedPipelines::new(Router::from_config(&RoutingConfig::default()), TIMEOUT)
        .register("smart", smart)
        .register("fast", fast);

    let routed = pipelines
        .route("Explain in detail how TLS works")
        .await
        .unwrap();
    assert_eq!(routed.pipeline, "smart");
    assert_eq!(routed.output, json!({"article": "A long article about TLS."}));
    assert_eq!(model.call_count(), 2);
    assert!(model.requests().iter().all(|r| r.tier == ModelTier::Smart));

    let routed = pipelines.route("quick: what is TLS?").await.unwrap();
    assert_eq!(routed.pipeline, "fast");
    assert_eq!(routed.output, Value::String("short answer".into()));
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn planner_tasks_fan_out_to_workers_in_plan_order() {
    let model = Arc::new(ScriptedModel::with_handler(|req| {
        let prompt = last_user_text(req);
        if let Some(goal) = prompt.strip_prefix("Goal: ") {
            assert_eq!(goal, "ship a release");
            return Ok(ModelResponse::text(
                "1. Write changelog\n2. Tag version\nSome commentary\n- Publish crate",
            ));
        }
        let task = prompt.trim_start_matches("Task: ");
        Ok(ModelResponse::text(format!("done: {}", task)))
    }));

    let planner = ModelStep::new("planner", model.clone(), "Goal: {goal}");
    let worker = ModelStep::new("worker", model.clone(), "Task: {task}");
    let config = WorkflowConfig {
        max_concurrency: Some(2),
        ..WorkflowConfig::default()
    };

    let orchestration = PlannerWorker::new(planner, worker, FanOut::from_config(&config), TIMEOUT)
        .run("ship a release")
        .await
        .unwrap();

    assert_eq!(
        orchestration.plan,
        vec!["Write changelog", "Tag version", "Publish crate"]
    );
    let outputs: Vec<String> = orchestration
        .results
        .iter()
        .map(|r| r.outcome.as_ref().unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        outputs,
        vec!["done: Write changelog", "done: Tag version", "done: Publish crate"]
    );
    assert_eq!(model.call_count(), 4);
}

#[tokio::test]
async fn convergence_loop_uses_configured_thresholds() {
    let evaluations = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = evaluations.clone();
    let model = Arc::new(ScriptedModel::with_handler(move |req| {
        let prompt = last_user_text(req);
        if prompt.starts_with("Explain") {
            return Ok(ModelResponse::text("first draft"));
        }
        if prompt.starts_with("Critique") {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let quality = if n == 0 { 5 } else { 7 };
            return Ok(ModelResponse::text(
                json!({
                    "overall_quality": quality,
                    "strengths": ["clear"],
                    "weaknesses": ["thin"],
                    "specific_suggestions": ["add an example"],
                    "needs_revision": quality < 7
                })
                .to_string(),
            ));
        }
        Ok(ModelResponse::text(
            json!({
                "revised_content": "second draft",
                "changes_made": ["added example"],
                "confidence_score": 0.9
            })
            .to_string(),
        ))
    }));

    // A threshold of 7 is met on the second evaluation.
    let config = WorkflowConfig {
        quality_threshold: 7,
        ..WorkflowConfig::default()
    };
    let report = ConvergenceLoop::new(
        ModelStep::new("draft", model.clone(), "Explain {topic}"),
        ModelStep::new("evaluate", model.clone(), "Critique: {content}").structured::<Critique>(),
        ModelStep::new("improve", model.clone(), "Improve: {original_content}\n{critique}")
            .structured::<Improvement>(),
        ConvergenceSettings::from_config(&config),
        TIMEOUT,
    )
    .run(json!({"topic": "entropy"}))
    .await
    .unwrap();

    assert_eq!(report.artifact, "second draft");
    assert_eq!(report.iterations, 2);
    assert_eq!(report.critique.map(|c| c.quality), Some(7));

    let improve_prompt = model
        .requests()
        .iter()
        .map(last_user_text)
        .find(|p| p.starts_with("Improve"))
        .unwrap();
    assert!(improve_prompt.contains("Quality Score: 5/10"));
    assert!(improve_prompt.contains("add an example"));
}
