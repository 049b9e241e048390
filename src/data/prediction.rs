use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lm::LmUsage;

/// A module's output: parsed fields plus execution metadata (iteration
/// counts, traces, scores) and the token usage of the calls behind it.
///
/// Mutable only inside the producing module's forward; callers treat it as
/// read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub fields: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,
    #[serde(default)]
    pub usage: LmUsage,
}

impl Prediction {
    pub fn new(fields: IndexMap<String, Value>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn with_usage(mut self, usage: LmUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Field value as prompt-ready text: strings verbatim, everything else
    /// JSON-encoded. Missing fields render empty.
    pub fn get_text(&self, name: &str) -> String {
        match self.fields.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// First output field's value, the conventional "the" answer slot.
    pub fn first(&self) -> Option<&Value> {
        self.fields.values().next()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accessors() {
        let prediction = Prediction::default()
            .with_field("answer", "Paris")
            .with_meta("iterations", 2);
        assert_eq!(prediction.get("answer"), Some(&json!("Paris")));
        assert_eq!(prediction.get_text("answer"), "Paris");
        assert_eq!(prediction.first(), Some(&json!("Paris")));
        assert_eq!(prediction.keys(), ["answer"]);
        assert_eq!(prediction.metadata["iterations"], json!(2));
    }

    #[test]
    fn serde_round_trip() {
        let prediction = Prediction::default()
            .with_field("answer", json!({"nested": [1, 2]}))
            .with_meta("score", 0.5);
        let decoded: Prediction =
            serde_json::from_str(&serde_json::to_string(&prediction).unwrap()).unwrap();
        assert_eq!(decoded, prediction);
    }
}
