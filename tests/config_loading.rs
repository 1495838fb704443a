use std::io::Write;
use std::time::Duration;

use flowline_core::config::AppConfig;
use flowline_core::error::FlowError;
use flowline_core::types::ModelTier;
use flowline_engine::Router;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}

#[test]
fn test_load_full_config_from_file() {
    let tmp = write_config(
        r#"
[models.fast]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-test-key"
max_tokens = 2048
temperature = 0.2

[models.smart]
model_id = "gpt-4o"
base_url = "http://localhost:8080/v1"

[retry]
max_retries = 5
initial_backoff_ms = 200
max_backoff_ms = 4000

[workflow]
max_iterations = 4
quality_threshold = 9
min_confidence = 0.5
step_timeout_secs = 30
max_concurrency = 2
max_steps = 40
max_turns = 6

[workflow.model_tier_overrides]
evaluate = "smart"

[routing]
default_pipeline = "fast"

[[routing.rules]]
pipeline = "smart"
markers = ["deep dive"]
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.models.fast.model_id, "gpt-4o-mini");
    assert_eq!(config.models.fast.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.models.fast.max_tokens, 2048);
    assert_eq!(config.models.for_tier(ModelTier::Smart).model_id, "gpt-4o");
    assert_eq!(
        config.models.for_tier(ModelTier::Smart).base_url.as_deref(),
        Some("http://localhost:8080/v1")
    );

    let retry = config.retry.expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 200);

    let wf = &config.workflow;
    assert_eq!(wf.max_iterations, 4);
    assert_eq!(wf.quality_threshold, 9);
    assert_eq!(wf.step_timeout(), Duration::from_secs(30));
    assert_eq!(wf.max_concurrency, Some(2));
    assert_eq!(wf.tier_for("evaluate", ModelTier::Fast), ModelTier::Smart);
    assert_eq!(wf.tier_for("draft", ModelTier::Fast), ModelTier::Fast);

    assert_eq!(config.routing.rules.len(), 1);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("FLOWLINE_TEST_API_KEY", "expanded-key-value");

    let tmp = write_config(
        r#"
[models.fast]
model_id = "test-model"
api_key = "${FLOWLINE_TEST_API_KEY}"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.models.fast.api_key,
        Some("expanded-key-value".to_string())
    );

    std::env::remove_var("FLOWLINE_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = write_config(
        r#"
[models.fast]
model_id = "llama3.2"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert!(config.models.smart.is_none());
    assert!(config.retry.is_none());
    assert_eq!(config.workflow.max_iterations, 3);
    assert_eq!(config.workflow.quality_threshold, 8);
    assert_eq!(config.workflow.max_concurrency, None);
    assert!(config.workflow.model_tier_overrides.is_empty());
    assert_eq!(config.routing.default_pipeline, "fast");
    assert!(config.routing.heuristic.is_some());
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, FlowError::ConfigNotFound(_)));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let tmp = write_config("[models.fast\nmodel_id = ");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, FlowError::Config(_)));
}

#[test]
fn test_invalid_workflow_values_are_rejected() {
    for workflow in [
        "max_iterations = 0",
        "min_confidence = 1.5",
        "max_concurrency = 0",
    ] {
        let tmp = write_config(&format!(
            "[models.fast]\nmodel_id = \"m\"\n\n[workflow]\n{}\n",
            workflow
        ));
        let err = AppConfig::load(tmp.path()).unwrap_err();
        assert!(
            matches!(err, FlowError::Config(_)),
            "{} should be rejected, got {:?}",
            workflow,
            err
        );
    }
}

#[test]
fn test_routing_section_drives_router() {
    let tmp = write_config(
        r#"
[models.fast]
model_id = "m"

[routing]
default_pipeline = "general"

[[routing.rules]]
pipeline = "legal"
markers = ["contract", "Liability"]

[[routing.rules]]
pipeline = "code"
markers = ["stack trace"]

[routing.heuristic]
pipeline = "research"
max_words = 5
keywords = ["survey"]
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");
    let router = Router::from_config(&config.routing);

    assert_eq!(router.select("Review this contract clause"), "legal");
    assert_eq!(router.select("who carries LIABILITY here"), "legal");
    assert_eq!(router.select("here is my stack trace"), "code");
    assert_eq!(router.select("survey the options"), "research");
    assert_eq!(router.select("one two three four five six"), "research");
    assert_eq!(router.select("hello there"), "general");
}
