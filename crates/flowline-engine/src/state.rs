use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::error::{FlowError, Result};

/// Key/value state owned by one executor for the duration of one run.
///
/// Only the stage or node currently executing writes to it. Values are JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    data: HashMap<String, Value>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from a step input. Objects become the map; any other
    /// value is stored under `input`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self {
                data: map.into_iter().collect(),
            },
            other => {
                let mut state = Self::new();
                state.set("input", other);
                state
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Value::String(value.into()));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Project the named keys into an input object. Every key must be present.
    pub fn select(&self, keys: &[String]) -> Result<Value> {
        let mut out = serde_json::Map::with_capacity(keys.len());
        for key in keys {
            let value = self.data.get(key).ok_or_else(|| {
                FlowError::InvalidInput(format!("state key '{}' has not been written", key))
            })?;
            out.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(out))
    }

    /// The whole state as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }
}
