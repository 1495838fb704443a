//! Structured-output variant of the model call.
//!
//! The target type supplies a JSON Schema (sent to the model) and a
//! `validate` hook for bounds the schema alone cannot enforce on our side.
//! Output that does not deserialize or validate is a `NonConforming` failure.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use flowline_core::error::{FlowError, Result};
use flowline_core::traits::ModelClient;
use flowline_core::types::{ChatMessage, ModelRequest, ModelTier};

/// A type the model can be asked to produce as JSON.
pub trait StructuredOutput: DeserializeOwned + Serialize + Send + 'static {
    /// JSON Schema describing the expected object.
    fn schema() -> serde_json::Value;

    /// Check numeric bounds and other constraints after deserialization.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Call the model and decode a conforming `T` from its reply.
pub async fn invoke_structured<T: StructuredOutput>(
    client: &dyn ModelClient,
    messages: Vec<ChatMessage>,
    tier: ModelTier,
) -> Result<T> {
    let request = ModelRequest::new(messages, tier).with_schema(T::schema());
    let response = client.complete(request).await?;
    parse_structured(&response.text)
}

/// Decode and validate a structured value from raw model text.
pub fn parse_structured<T: StructuredOutput>(text: &str) -> Result<T> {
    let json_str = extract_json(text);
    let value: T = serde_json::from_str(json_str).map_err(|e| {
        warn!(error = %e, response = %text, "Model output is not valid structured JSON");
        FlowError::NonConforming(e.to_string())
    })?;
    value.validate().map_err(FlowError::NonConforming)?;
    Ok(value)
}

/// Extract JSON from a response that may contain markdown code fences.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Score {
        value: u8,
    }

    impl StructuredOutput for Score {
        fn schema() -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {"value": {"type": "integer", "minimum": 1, "maximum": 10}},
                "required": ["value"]
            })
        }

        fn validate(&self) -> std::result::Result<(), String> {
            if (1..=10).contains(&self.value) {
                Ok(())
            } else {
                Err(format!("value {} outside 1..=10", self.value))
            }
        }
    }

    #[test]
    fn test_extract_json_code_fence() {
        let input = "Here you go:\n```json\n{\"value\": 4}\n```";
        assert_eq!(extract_json(input), "{\"value\": 4}");
    }

    #[test]
    fn test_extract_json_with_text() {
        let input = r#"The score is: {"value": 7} end"#;
        assert_eq!(extract_json(input), r#"{"value": 7}"#);
    }

    #[test]
    fn parse_accepts_in_bounds() {
        let s: Score = parse_structured(r#"{"value": 9}"#).unwrap();
        assert_eq!(s.value, 9);
    }

    #[test]
    fn parse_rejects_out_of_bounds() {
        let err = parse_structured::<Score>(r#"{"value": 11}"#).unwrap_err();
        assert!(matches!(err, FlowError::NonConforming(_)));
    }

    #[test]
    fn parse_rejects_prose() {
        let err = parse_structured::<Score>("I think it is pretty good").unwrap_err();
        assert_eq!(err.kind(), flowline_core::ErrorKind::UpstreamFailure);
    }
}
