//! Fan-out/fan-in: run independent steps concurrently, collect in input order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use flowline_core::config::WorkflowConfig;
use flowline_core::error::{FlowError, Result};

use crate::step::{execute, Step};

/// Concurrent executor for a batch of `(step, request)` items.
///
/// Every item is spawned as its own task before any is awaited. `result[i]`
/// always belongs to `items[i]`; a failing or panicking item only fills its
/// own slot.
#[derive(Debug, Clone)]
pub struct FanOut {
    default_timeout: Duration,
    max_concurrency: Option<usize>,
}

impl FanOut {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            max_concurrency: None,
        }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            default_timeout: config.step_timeout(),
            max_concurrency: config.max_concurrency,
        }
    }

    /// Bound the number of steps in flight. `None` is unbounded.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub async fn run(&self, items: Vec<(Arc<dyn Step>, Value)>) -> Vec<Result<Value>> {
        let start = Instant::now();
        let count = items.len();
        info!(items = count, max_concurrency = ?self.max_concurrency, "Fanning out");

        let semaphore = self
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let mut handles = Vec::with_capacity(count);
        for (step, input) in items {
            let name = step.name().to_string();
            let timeout = self.default_timeout;
            let semaphore = semaphore.clone();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(sem) => Some(sem.acquire_owned().await.map_err(|e| {
                        FlowError::Internal(format!("concurrency limiter closed: {}", e))
                    })?),
                    None => None,
                };
                execute(step.as_ref(), input, timeout).await
            });
            handles.push((name, handle));
        }

        let mut results = Vec::with_capacity(count);
        for (index, (name, handle)) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    warn!(index, step = %name, error = %join_err, "Fan-out task did not complete");
                    Err(FlowError::StepPanicked {
                        step: name,
                        message: join_err.to_string(),
                    })
                }
            };
            results.push(outcome);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            items = count,
            succeeded = count - failed,
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fan-in complete"
        );
        results
    }

    /// Run one step over many inputs.
    pub async fn map(&self, step: Arc<dyn Step>, inputs: Vec<Value>) -> Vec<Result<Value>> {
        let items = inputs
            .into_iter()
            .map(|input| (step.clone(), input))
            .collect();
        self.run(items).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use flowline_core::ErrorKind;
    use flowline_test_utils::{DelayStep, FailStep, PanicStep};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn delayed(tag: &str, ms: u64) -> (Arc<dyn Step>, Value) {
        let step: Arc<dyn Step> = Arc::new(DelayStep::new(tag, Duration::from_millis(ms), json!(tag)));
        (step, json!(null))
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order_not_completion_order() {
        let start = tokio::time::Instant::now();
        let results = FanOut::new(TIMEOUT)
            .run(vec![delayed("A", 300), delayed("B", 50), delayed("C", 150)])
            .await;
        let elapsed = start.elapsed();

        let values: Vec<Value> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![json!("A"), json!("B"), json!("C")]);
        // Concurrent: bounded by the slowest item, not the sum.
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn order_holds_under_jittered_latency() {
        let items: Vec<_> = (0..16u64)
            .map(|i| delayed(&format!("item-{}", i), (i * 37 % 11) * 10 + 1))
            .collect();
        let results = FanOut::new(TIMEOUT).run(items).await;
        for (i, r) in results.into_iter().enumerate() {
            assert_eq!(r.unwrap(), json!(format!("item-{}", i)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_stay_in_their_slot() {
        let fail: Arc<dyn Step> = Arc::new(FailStep::new("b", "HTTP 503"));
        let results = FanOut::new(TIMEOUT)
            .run(vec![delayed("A", 30), (fail, json!(null)), delayed("C", 10)])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &json!("A"));
        assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::UpstreamFailure);
        assert_eq!(results[2].as_ref().unwrap(), &json!("C"));
    }

    #[tokio::test]
    async fn panicking_item_does_not_cancel_siblings() {
        let panic: Arc<dyn Step> = Arc::new(PanicStep);
        let results = FanOut::new(TIMEOUT)
            .run(vec![(panic, json!(null)), delayed("B", 5)])
            .await;
        assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::InternalError);
        assert_eq!(results[1].as_ref().unwrap(), &json!("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_serializes_work() {
        let start = tokio::time::Instant::now();
        let results = FanOut::new(TIMEOUT)
            .with_max_concurrency(Some(1))
            .run(vec![delayed("A", 100), delayed("B", 100), delayed("C", 100)])
            .await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        assert!(FanOut::new(TIMEOUT).run(vec![]).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn map_applies_one_step_to_each_input() {
        let echo: Arc<dyn Step> = Arc::new(DelayStep::echo("echo", Duration::from_millis(5)));
        let results = FanOut::new(TIMEOUT)
            .map(echo, vec![json!(1), json!(2), json!(3)])
            .await;
        let values: Vec<Value> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    }
}
