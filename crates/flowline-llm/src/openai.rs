use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flowline_core::config::ModelsConfig;
use flowline_core::error::{FlowError, Result};
use flowline_core::traits::ModelClient;
use flowline_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
///
/// Each request's tier picks the model configuration from [`ModelsConfig`].
pub struct OpenAiClient {
    http: Client,
    models: ModelsConfig,
}

impl OpenAiClient {
    pub fn new(models: ModelsConfig) -> Self {
        Self {
            http: Client::new(),
            models,
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize, Debug)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: OaiFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: function_type(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn convert_messages(messages: &[ChatMessage]) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System | Role::User => oai_msgs.push(OaiMessage {
                role: if msg.role == Role::System { "system" } else { "user" }.to_string(),
                content: Some(msg.text()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::Assistant => {
                let calls = msg.tool_calls();
                let text = msg.text();
                oai_msgs.push(OaiMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() && !calls.is_empty() {
                        None
                    } else {
                        Some(text)
                    },
                    tool_calls: if calls.is_empty() {
                        None
                    } else {
                        Some(
                            calls
                                .into_iter()
                                .map(|c| OaiToolCall {
                                    id: c.id,
                                    r#type: function_type(),
                                    function: OaiFunction {
                                        name: c.name,
                                        arguments: c.args.to_string(),
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: None,
                });
            }
            Role::Tool => {
                for block in &msg.content {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        oai_msgs.push(OaiMessage {
                            role: "tool".to_string(),
                            content: Some(content.clone()),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                        });
                    }
                }
            }
        }
    }

    oai_msgs
}

fn convert_tool_call(call: OaiToolCall) -> ToolCall {
    let args = if call.function.arguments.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
            warn!(tool = %call.function.name, error = %e, "Tool arguments are not JSON");
            serde_json::Value::String(call.function.arguments.clone())
        })
    };
    ToolCall {
        id: call.id,
        name: call.function.name,
        args,
    }
}

fn schema_instruction(schema: &serde_json::Value) -> String {
    format!(
        "Respond with ONLY a valid JSON object matching this JSON Schema:\n{}",
        schema
    )
}

impl ModelClient for OpenAiClient {
    fn complete(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move {
            let config = self.models.for_tier(request.tier);
            let url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let mut messages = convert_messages(&request.messages);
            let response_format = request.response_schema.as_ref().map(|schema| {
                messages.push(OaiMessage {
                    role: "system".to_string(),
                    content: Some(schema_instruction(schema)),
                    tool_calls: None,
                    tool_call_id: None,
                });
                serde_json::json!({"type": "json_object"})
            });

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                tools: convert_tools(&request.tools),
                response_format,
            };

            debug!(model = %config.model_id, tier = %request.tier, "Sending chat completion");

            let mut req = self.http.post(url).json(&body);
            if let Some(ref key) = config.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    FlowError::ModelRequest(format!("timeout: {}", e))
                } else if e.is_connect() {
                    FlowError::ModelRequest(format!("connection error: {}", e))
                } else {
                    FlowError::ModelRequest(e.to_string())
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(FlowError::ModelRequest(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    text
                )));
            }

            let parsed: ChatResponse = resp
                .json()
                .await
                .map_err(|e| FlowError::ModelRequest(format!("invalid response body: {}", e)))?;

            let message = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message)
                .ok_or_else(|| FlowError::ModelRequest("response had no choices".into()))?;

            Ok(ModelResponse {
                text: message.content.unwrap_or_default(),
                tool_calls: message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(convert_tool_call)
                    .collect(),
            })
        })
    }
}
