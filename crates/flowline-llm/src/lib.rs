pub mod openai;
pub mod retry;
pub mod structured;

use std::sync::Arc;

use flowline_core::config::AppConfig;
use flowline_core::traits::ModelClient;

pub use openai::OpenAiClient;
pub use retry::RetryingClient;
pub use structured::{extract_json, invoke_structured, parse_structured, StructuredOutput};

/// Build the model-call capability described by the config.
///
/// Every provider is reached through the OpenAI-compatible wire format;
/// a `[retry]` section wraps the client in [`RetryingClient`].
pub fn create_client(config: &AppConfig) -> Arc<dyn ModelClient> {
    let client = OpenAiClient::new(config.models.clone());
    match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(Box::new(client), retry.clone())),
        None => Arc::new(client),
    }
}
