use futures::future::BoxFuture;
use serde_json::json;

use flowline_core::error::{FlowError, Result};
use flowline_core::traits::Tool;
use flowline_core::types::ToolResult;

/// Approximate 2023 GDP in trillion USD, keyed by lowercase country name.
const GDP_TABLE: &[(&str, f64)] = &[
    ("japan", 4.2),
    ("germany", 4.5),
    ("usa", 26.9),
    ("united states", 26.9),
    ("china", 17.7),
    ("uk", 3.1),
    ("united kingdom", 3.1),
    ("france", 2.9),
    ("india", 3.7),
    ("italy", 2.1),
    ("canada", 2.1),
    ("south korea", 1.8),
    ("russia", 2.2),
    ("brazil", 2.1),
    ("australia", 1.6),
];

pub fn lookup(country: &str) -> Option<f64> {
    let key = country.trim().to_lowercase();
    GDP_TABLE
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, gdp)| *gdp)
}

pub struct GdpTool;

impl Tool for GdpTool {
    fn name(&self) -> &str {
        "get_gdp"
    }

    fn description(&self) -> &str {
        "Get the GDP of a country in trillion USD (approximate 2023 data)."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "country": {
                    "type": "string",
                    "description": "Country name, e.g. 'Japan'"
                }
            },
            "required": ["country"]
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let country = input["country"]
                .as_str()
                .ok_or_else(|| FlowError::InvalidInput("'country' must be a string".into()))?;

            Ok(match lookup(country) {
                Some(gdp) => ToolResult::success(format!(
                    "GDP of {}: ${} trillion USD",
                    country, gdp
                )),
                None => ToolResult::success(format!("GDP data not available for {}", country)),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("Japan"), Some(4.2));
        assert_eq!(lookup("United States"), Some(26.9));
        assert_eq!(lookup(" germany "), Some(4.5));
        assert_eq!(lookup("Atlantis"), None);
    }

    #[tokio::test]
    async fn reports_known_and_unknown_countries() {
        let hit = GdpTool.execute(json!({"country": "Japan"})).await.unwrap();
        assert_eq!(hit.content, "GDP of Japan: $4.2 trillion USD");

        let miss = GdpTool.execute(json!({"country": "Atlantis"})).await.unwrap();
        assert!(!miss.is_error);
        assert_eq!(miss.content, "GDP data not available for Atlantis");
    }
}
