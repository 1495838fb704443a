//! Content-based routing.
//!
//! `Router::select` is a pure function of the query text. `RoutedPipelines`
//! runs the chosen pipeline exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use flowline_core::config::RoutingConfig;
use flowline_core::error::{FlowError, Result};

use crate::step::{execute, Step};

/// A marker rule: any marker contained in the query selects `pipeline`.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub pipeline: String,
    pub markers: Vec<String>,
}

/// Fallback applied when no rule matches.
#[derive(Debug, Clone)]
pub struct Heuristic {
    pub pipeline: String,
    pub max_words: usize,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<RouteRule>,
    heuristic: Option<Heuristic>,
    default_pipeline: String,
}

impl Router {
    pub fn new(default_pipeline: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            heuristic: None,
            default_pipeline: default_pipeline.into(),
        }
    }

    /// Add a rule. Rules are checked in the order they were added.
    pub fn with_rule<I, S>(mut self, pipeline: impl Into<String>, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(RouteRule {
            pipeline: pipeline.into(),
            markers: markers
                .into_iter()
                .map(|m| m.into().to_lowercase())
                .collect(),
        });
        self
    }

    pub fn with_heuristic<I, S>(
        mut self,
        pipeline: impl Into<String>,
        max_words: usize,
        keywords: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.heuristic = Some(Heuristic {
            pipeline: pipeline.into(),
            max_words,
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        });
        self
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        let mut router = Self::new(config.default_pipeline.clone());
        for rule in &config.rules {
            router = router.with_rule(rule.pipeline.clone(), rule.markers.iter().cloned());
        }
        if let Some(h) = &config.heuristic {
            router = router.with_heuristic(h.pipeline.clone(), h.max_words, h.keywords.iter().cloned());
        }
        router
    }

    /// Choose a pipeline id for `query`. Deterministic and side-effect free.
    pub fn select(&self, query: &str) -> &str {
        let lowered = query.to_lowercase();

        if let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.markers.iter().any(|m| lowered.contains(m.as_str())))
        {
            return &rule.pipeline;
        }

        if let Some(h) = &self.heuristic {
            let long = lowered.split_whitespace().count() > h.max_words;
            if long || h.keywords.iter().any(|k| lowered.contains(k.as_str())) {
                return &h.pipeline;
            }
        }

        &self.default_pipeline
    }

    /// Every pipeline id this router can return.
    pub fn pipeline_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.rules.iter().map(|r| r.pipeline.as_str()).collect();
        if let Some(h) = &self.heuristic {
            ids.push(&h.pipeline);
        }
        ids.push(&self.default_pipeline);
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// What a routed run produced.
#[derive(Debug, Clone)]
pub struct Routed {
    pub pipeline: String,
    pub output: Value,
}

/// A router bound to the pipelines it selects between.
pub struct RoutedPipelines {
    router: Router,
    pipelines: HashMap<String, Arc<dyn Step>>,
    default_timeout: Duration,
}

impl RoutedPipelines {
    pub fn new(router: Router, default_timeout: Duration) -> Self {
        Self {
            router,
            pipelines: HashMap::new(),
            default_timeout,
        }
    }

    pub fn register(mut self, id: impl Into<String>, pipeline: impl Step) -> Self {
        self.pipelines.insert(id.into(), Arc::new(pipeline));
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Select a pipeline for `query` and run it once with `{"query": query}`.
    pub async fn route(&self, query: &str) -> Result<Routed> {
        let id = self.router.select(query);
        info!(pipeline = %id, "Routing query");

        let pipeline = self.pipelines.get(id).ok_or_else(|| {
            FlowError::InvalidInput(format!("no pipeline registered for route '{}'", id))
        })?;

        debug!(pipeline = %id, step = %pipeline.name(), "Running routed pipeline");
        let output = execute(pipeline.as_ref(), json!({ "query": query }), self.default_timeout).await?;
        Ok(Routed {
            pipeline: id.to_string(),
            output,
        })
    }
}
