use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::types::ModelTier;

/// Top-level Flowline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub models: ModelsConfig,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Model configuration per tier. `smart` falls back to `fast` when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub fast: ModelConfig,
    #[serde(default)]
    pub smart: Option<ModelConfig>,
}

impl ModelsConfig {
    pub fn for_tier(&self, tier: ModelTier) -> &ModelConfig {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Smart => self.smart.as_ref().unwrap_or(&self.fast),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 2000 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Per-workflow knobs shared by every executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Cap on convergence-loop evaluations and agent plan cycles.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Minimum critique quality (1-10) accepted by the convergence loop.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u8,
    /// Improvement confidence below this stops the convergence loop early.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Step name -> model tier, overriding the tier a step was built with.
    #[serde(default)]
    pub model_tier_overrides: HashMap<String, ModelTier>,
    /// Upper bound on concurrently running fan-out items (unbounded if unset).
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Node visits allowed in one graph run before it is treated as runaway.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Model turns allowed in one augmented tool-calling conversation.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            quality_threshold: default_quality_threshold(),
            min_confidence: default_min_confidence(),
            step_timeout_secs: default_step_timeout_secs(),
            model_tier_overrides: HashMap::new(),
            max_concurrency: None,
            max_steps: default_max_steps(),
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_iterations() -> u32 { 3 }
fn default_quality_threshold() -> u8 { 8 }
fn default_min_confidence() -> f64 { 0.3 }
fn default_step_timeout_secs() -> u64 { 120 }
fn default_max_steps() -> usize { 64 }
fn default_max_turns() -> usize { 10 }

impl WorkflowConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Resolve the tier for a named step, honoring overrides.
    pub fn tier_for(&self, step_name: &str, default: ModelTier) -> ModelTier {
        self.model_tier_overrides
            .get(step_name)
            .copied()
            .unwrap_or(default)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(FlowError::Config("max_iterations must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(FlowError::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if self.max_steps == 0 || self.max_turns == 0 {
            return Err(FlowError::Config(
                "max_steps and max_turns must be positive".into(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(FlowError::Config("max_concurrency must be positive".into()));
        }
        Ok(())
    }
}

/// Marker-based routing rules, checked in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_route_rules")]
    pub rules: Vec<RouteRuleConfig>,
    #[serde(default = "default_route_heuristic")]
    pub heuristic: Option<RouteHeuristicConfig>,
    #[serde(default = "default_pipeline")]
    pub default_pipeline: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRuleConfig {
    pub pipeline: String,
    pub markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteHeuristicConfig {
    pub pipeline: String,
    /// Inputs with more words than this take the heuristic pipeline.
    #[serde(default = "default_heuristic_max_words")]
    pub max_words: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: default_route_rules(),
            heuristic: default_route_heuristic(),
            default_pipeline: default_pipeline(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_route_rules() -> Vec<RouteRuleConfig> {
    vec![
        RouteRuleConfig {
            pipeline: "smart".into(),
            markers: strings(&[
                "explain in detail",
                "comprehensive",
                "thorough analysis",
                "step by step",
                "complex",
                "intricate",
                "elaborate",
            ]),
        },
        RouteRuleConfig {
            pipeline: "fast".into(),
            markers: strings(&[
                "quick", "brief", "short", "tldr", "summary", "simple", "basic", "overview",
            ]),
        },
    ]
}

fn default_route_heuristic() -> Option<RouteHeuristicConfig> {
    Some(RouteHeuristicConfig {
        pipeline: "smart".into(),
        max_words: default_heuristic_max_words(),
        keywords: strings(&["analyze", "compare", "evaluate", "research"]),
    })
}

fn default_heuristic_max_words() -> usize { 20 }
fn default_pipeline() -> String { "fast".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.workflow.validate()?;
        Ok(config)
    }

    /// Config used when no file exists: OpenAI models keyed by `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY is not set, model calls will be rejected");
        }
        let model = |id: &str| ModelConfig {
            provider: default_provider(),
            model_id: id.to_string(),
            api_key: api_key.clone(),
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        };
        Self {
            models: ModelsConfig {
                fast: model("gpt-4o-mini"),
                smart: Some(model("gpt-4o")),
            },
            retry: Some(RetryConfig::default()),
            workflow: WorkflowConfig::default(),
            routing: RoutingConfig::default(),
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            match std::env::var(&name) {
                Ok(val) => result.push_str(&val),
                // Keep the reference verbatim so the failure is visible later
                Err(_) => result.push_str(&format!("${{{}}}", name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
