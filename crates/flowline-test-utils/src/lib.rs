//! Test doubles shared across the Flowline crates.
//!
//! `ScriptedModel` and `StallingModel` stand in for the model boundary; `DelayStep`,
//! `FailStep`, `PanicStep` and `CountingStep` exercise executor behavior
//! without any network traffic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use flowline_core::error::{FlowError, Result};
use flowline_core::traits::{ModelClient, Step};
use flowline_core::types::{ModelRequest, ModelResponse};

type Handler = Box<dyn Fn(&ModelRequest) -> Result<ModelResponse> + Send + Sync>;

/// A model client that replays canned responses.
///
/// Either pops from a queue (one entry per call, in call order) or answers
/// every call through a handler closure. Every request is recorded.
pub struct ScriptedModel {
    queue: Mutex<VecDeque<Result<ModelResponse>>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    /// Reply with the given texts, one per call.
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_responses(texts.into_iter().map(|t| Ok(ModelResponse::text(t))))
    }

    pub fn from_responses(responses: impl IntoIterator<Item = Result<ModelResponse>>) -> Self {
        Self {
            queue: Mutex::new(responses.into_iter().collect()),
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call by inspecting the request.
    pub fn with_handler(
        handler: impl Fn(&ModelRequest) -> Result<ModelResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            handler: Some(Box::new(handler)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Snapshot of the requests received, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move {
            let reply = match &self.handler {
                Some(handler) => handler(&request),
                None => self
                    .queue
                    .lock()
                    .map_err(|_| FlowError::Internal("script lock poisoned".into()))?
                    .pop_front()
                    .unwrap_or_else(|| Err(FlowError::ModelRequest("script exhausted".into()))),
            };
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }
            reply
        })
    }
}

/// A model that never answers the requests it stalls on; everything else
/// goes to a fallback [`ScriptedModel`].
pub struct StallingModel {
    fallback: ScriptedModel,
    stall_if: Box<dyn Fn(&ModelRequest) -> bool + Send + Sync>,
    stalled: AtomicUsize,
}

impl StallingModel {
    /// Stall on every request.
    pub fn new() -> Self {
        Self::stall_when(ScriptedModel::new(Vec::<String>::new()), |_| true)
    }

    pub fn stall_when(
        fallback: ScriptedModel,
        stall_if: impl Fn(&ModelRequest) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            fallback,
            stall_if: Box::new(stall_if),
            stalled: AtomicUsize::new(0),
        }
    }

    /// Requests that were left hanging.
    pub fn stalled(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }
}

impl Default for StallingModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelClient for StallingModel {
    fn complete(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        if (self.stall_if)(&request) {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            return Box::pin(futures::future::pending());
        }
        self.fallback.complete(request)
    }
}

/// Sleeps for a fixed delay, then returns its output (or echoes the input).
pub struct DelayStep {
    name: String,
    delay: Duration,
    output: Option<Value>,
}

impl DelayStep {
    pub fn new(name: impl Into<String>, delay: Duration, output: Value) -> Self {
        Self {
            name: name.into(),
            delay,
            output: Some(output),
        }
    }

    pub fn echo(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            output: None,
        }
    }
}

impl Step for DelayStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(self.output.clone().unwrap_or(input))
        })
    }
}

/// Always fails with an upstream error carrying the given message.
pub struct FailStep {
    name: String,
    message: String,
}

impl FailStep {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl Step for FailStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { Err(FlowError::ModelRequest(self.message.clone())) })
    }
}

/// Panics when run.
pub struct PanicStep;

impl Step for PanicStep {
    fn name(&self) -> &str {
        "panic"
    }

    fn run(&self, _input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { panic!("step blew up") })
    }
}

/// Counts its invocations and echoes the input.
#[derive(Clone, Default)]
pub struct CountingStep {
    name: String,
    calls: Arc<AtomicUsize>,
}

impl CountingStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Step for CountingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(input) })
    }
}
