//! Step execution and the built-in step kinds.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use flowline_core::config::WorkflowConfig;
use flowline_core::error::{FlowError, Result};
pub use flowline_core::traits::Step;
use flowline_core::traits::ModelClient;
use flowline_core::types::{ChatMessage, ModelRequest, ModelTier};
use flowline_llm::structured::{parse_structured, StructuredOutput};

/// Run one step invocation, producing exactly one outcome.
///
/// The step's own timeout wins over `default_timeout`. Expiry is reported as
/// `StepTimeout`; a panic inside the step is reported as `StepPanicked`.
pub async fn execute(step: &dyn Step, input: Value, default_timeout: Duration) -> Result<Value> {
    let limit = step.timeout().unwrap_or(default_timeout);
    guarded(step.name(), limit, async move { step.run(input).await }).await
}

/// Await `work` under a `limit` deadline with panics captured, logging the
/// outcome under `name`. Used for model calls made outside a [`Step`].
pub async fn guarded<T, F>(name: &str, limit: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let outcome = match tokio::time::timeout(limit, AssertUnwindSafe(work).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(FlowError::StepPanicked {
            step: name.to_string(),
            message: panic_message(payload.as_ref()),
        }),
        Err(_) => Err(FlowError::StepTimeout {
            step: name.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match &outcome {
        Ok(_) => debug!(step = %name, elapsed_ms, "Step succeeded"),
        Err(e) => warn!(step = %name, elapsed_ms, kind = %e.kind(), error = %e, "Step failed"),
    }
    outcome
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A step backed by an async closure.
pub struct FnStep<F> {
    name: String,
    timeout: Option<Duration>,
    f: F,
}

impl<F, Fut> FnStep<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            f,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<F, Fut> Step for FnStep<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin((self.f)(input))
    }
}

type Decoder = fn(&str) -> Result<Value>;

fn decode_as<T: StructuredOutput>(text: &str) -> Result<Value> {
    let value: T = parse_structured(text)?;
    Ok(serde_json::to_value(value)?)
}

/// A single model call driven by a prompt template.
///
/// `{field}` placeholders are filled from the input object; `{{` and `}}`
/// are literal braces. A non-object input is available as `{input}`.
pub struct ModelStep {
    name: String,
    client: Arc<dyn ModelClient>,
    template: String,
    system: Option<String>,
    tier: ModelTier,
    timeout: Option<Duration>,
    schema: Option<(Value, Decoder)>,
}

impl ModelStep {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ModelClient>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            template: template.into(),
            system: None,
            tier: ModelTier::Fast,
            timeout: None,
            schema: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Apply `model_tier_overrides` for this step's name.
    pub fn configured(mut self, config: &WorkflowConfig) -> Self {
        self.tier = config.tier_for(&self.name, self.tier);
        self
    }

    /// Request a schema-conforming `T` and return it as a JSON value.
    pub fn structured<T: StructuredOutput>(mut self) -> Self {
        self.schema = Some((T::schema(), decode_as::<T>));
        self
    }

    pub fn tier(&self) -> ModelTier {
        self.tier
    }

    fn build_request(&self, input: &Value) -> Result<ModelRequest> {
        let prompt = render_template(&self.template, input)?;
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(render_template(system, input)?));
        }
        messages.push(ChatMessage::user(prompt));

        let mut request = ModelRequest::new(messages, self.tier);
        if let Some((schema, _)) = &self.schema {
            request = request.with_schema(schema.clone());
        }
        Ok(request)
    }
}

impl Step for ModelStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let request = self.build_request(&input)?;
            debug!(step = %self.name, tier = %self.tier, "Calling model");
            let response = self.client.complete(request).await?;
            match &self.schema {
                Some((_, decode)) => decode(&response.text),
                None => Ok(Value::String(response.text.trim().to_string())),
            }
        })
    }
}

/// Fill `{field}` placeholders from `input`.
///
/// Brace groups whose content is not an identifier are copied verbatim, so
/// JSON examples inside prompts survive rendering.
pub fn render_template(template: &str, input: &Value) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        let placeholder = tail[1..]
            .find('}')
            .map(|end| &tail[1..=end])
            .filter(|name| is_identifier(name));

        match placeholder {
            Some(field) => {
                out.push_str(&lookup_field(input, field)?);
                rest = &tail[field.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn lookup_field(input: &Value, field: &str) -> Result<String> {
    let value = match input {
        Value::Object(map) => map.get(field),
        other if field == "input" => Some(other),
        _ => None,
    };
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(FlowError::InvalidInput(format!(
            "template field '{}' is missing from the step input",
            field
        ))),
    }
}
