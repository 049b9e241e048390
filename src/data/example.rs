use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A training record: named inputs, named outputs, and free-form metadata.
///
/// Examples are shared read-only once loaded; optimizers never mutate them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    #[serde(default)]
    pub inputs: IndexMap<String, Value>,
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,
}

impl Example {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }

    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Looks a field up in inputs first, then outputs.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).or_else(|| self.outputs.get(name))
    }

    /// Field value rendered as prompt text: strings verbatim, everything
    /// else JSON-encoded.
    pub fn get_text(&self, name: &str) -> String {
        match self.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Reclassifies fields: the named ones become inputs, every other field
    /// becomes an output. Metadata is untouched.
    pub fn with_inputs(&self, names: &[&str]) -> Self {
        let mut reclassified = Example {
            metadata: self.metadata.clone(),
            ..Default::default()
        };
        for (name, value) in self.inputs.iter().chain(self.outputs.iter()) {
            if names.contains(&name.as_str()) {
                reclassified.inputs.insert(name.clone(), value.clone());
            } else {
                reclassified.outputs.insert(name.clone(), value.clone());
            }
        }
        reclassified
    }

    /// All field names, inputs before outputs.
    pub fn keys(&self) -> Vec<&str> {
        self.inputs
            .keys()
            .chain(self.outputs.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}
