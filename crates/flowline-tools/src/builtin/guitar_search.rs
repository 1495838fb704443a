use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::json;

use flowline_core::error::{FlowError, Result};
use flowline_core::traits::Tool;
use flowline_core::types::ToolResult;

/// A listing returned by the mock marketplace search.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Listing {
    pub title: &'static str,
    pub price: f64,
    pub url: &'static str,
    pub description: &'static str,
}

const LISTINGS: &[Listing] = &[
    Listing {
        title: "Schecter Omen-8 8-String Electric Guitar",
        price: 649.99,
        url: "https://example.com/schecter-omen-8",
        description: "Used 8-string guitar in excellent condition",
    },
    Listing {
        title: "Ibanez RG8 8-String Electric Guitar",
        price: 599.99,
        url: "https://example.com/ibanez-rg8",
        description: "Pre-owned 8-string with minor wear",
    },
    Listing {
        title: "ESP LTD M-8 8-String Guitar",
        price: 750.00,
        url: "https://example.com/esp-ltd-m8",
        description: "8-string guitar, slightly over budget",
    },
];

/// Listings whose title or description contains the query. Falls back to
/// every listing when nothing matches.
pub fn search(query: &str) -> Vec<Listing> {
    let needle = query.to_lowercase();
    let hits: Vec<Listing> = LISTINGS
        .iter()
        .filter(|l| {
            l.title.to_lowercase().contains(&needle)
                || l.description.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect();
    if hits.is_empty() {
        LISTINGS.to_vec()
    } else {
        hits
    }
}

pub struct GuitarSearchTool;

impl Tool for GuitarSearchTool {
    fn name(&self) -> &str {
        "search_guitars"
    }

    fn description(&self) -> &str {
        "Search guitar listings. Returns title, price, url and description for each match."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query, e.g. 'ibanez' or '8-string'"
                }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let query = input["query"]
                .as_str()
                .ok_or_else(|| FlowError::InvalidInput("'query' must be a string".into()))?;
            let results = search(query);
            Ok(ToolResult::success(serde_json::to_string(&results)?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_by_title_or_description() {
        let hits = search("ibanez");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].price, 599.99);

        let hits = search("over budget");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].title.starts_with("ESP"));
    }

    #[test]
    fn no_match_returns_everything() {
        assert_eq!(search("banjo").len(), 3);
    }

    #[tokio::test]
    async fn tool_returns_json_listing() {
        let result = GuitarSearchTool
            .execute(json!({"query": "schecter"}))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed[0]["url"], "https://example.com/schecter-omen-8");
    }
}
