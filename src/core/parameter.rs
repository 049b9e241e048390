use std::sync::RwLock;

use serde_json::Value;

/// A single tunable slot inside a module: typically the `demos` list of a
/// [`Predict`](crate::modules::Predict) leaf.
///
/// The value lives behind its own reader/writer lock so optimizers can
/// mutate a compiled copy through shared references while the program is
/// otherwise immutable.
#[derive(Debug, Default)]
pub struct Parameter {
    value: RwLock<Option<Value>>,
}

impl Parameter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Value) -> Self {
        Self {
            value: RwLock::new(Some(value)),
        }
    }

    /// Snapshot of the current value.
    pub fn value(&self) -> Option<Value> {
        self.value.read().expect("parameter lock poisoned").clone()
    }

    pub fn set_value(&self, value: Value) {
        *self.value.write().expect("parameter lock poisoned") = Some(value);
    }

    /// Clears the slot back to unset.
    pub fn reset(&self) {
        *self.value.write().expect("parameter lock poisoned") = None;
    }

    pub fn is_set(&self) -> bool {
        self.value.read().expect("parameter lock poisoned").is_some()
    }

    /// JSON view used by program save/load: `Null` for an unset slot.
    pub fn to_json(&self) -> Value {
        self.value().unwrap_or(Value::Null)
    }

    pub fn load_json(&self, value: &Value) {
        if value.is_null() {
            self.reset();
        } else {
            self.set_value(value.clone());
        }
    }
}

/// Deep copy: the clone owns an independent value under a fresh lock. This
/// is what makes a cloned program safe to mutate during optimization.
impl Clone for Parameter {
    fn clone(&self) -> Self {
        Self {
            value: RwLock::new(self.value()),
        }
    }
}
