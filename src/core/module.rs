use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};

use crate::data::{Example, Prediction};
use crate::modules::Predict;

use super::errors::PredictError;
use super::parameter::Parameter;

/// A unit of program behavior.
///
/// Modules form a strict ownership tree: each composite owns its children
/// and aggregates their parameters and predictors under dotted paths, so
/// discovery is explicit registration rather than reflection, and no
/// visited-set is needed to cut cycles.
///
/// Deep copies come from `Clone` on the concrete type;
/// [`Parameter::clone`] deep-copies slot contents, which is what lets
/// optimizers mutate a compiled copy without touching the original.
#[async_trait]
pub trait Module: Send + Sync {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError>;

    /// Every tunable parameter reachable from this module, keyed by dotted
    /// path (e.g. `"extract.predict.demos"`).
    fn parameters(&self) -> IndexMap<String, &Parameter> {
        IndexMap::new()
    }

    /// Every [`Predict`] leaf reachable from this module, keyed by dotted
    /// path. Instruction-tuning optimizers mutate these in place.
    fn predictors(&self) -> Vec<(String, &Predict)> {
        Vec::new()
    }

    /// Clears every parameter back to unset.
    fn reset(&self) {
        for (_, parameter) in self.parameters() {
            parameter.reset();
        }
    }

    /// Serializes tunable state as
    /// `{"parameters": {"<dotted.path>": value…}, "compiled": bool}`.
    fn save_state(&self) -> Value {
        let parameters: serde_json::Map<String, Value> = self
            .parameters()
            .into_iter()
            .map(|(name, parameter)| (name, parameter.to_json()))
            .collect();
        let compiled = parameters.values().any(|value| !value.is_null());
        json!({ "parameters": parameters, "compiled": compiled })
    }

    /// Restores matching-named parameters, silently ignoring unknown names
    /// on either side.
    fn load_state(&self, state: &Value) {
        let Some(saved) = state.get("parameters").and_then(Value::as_object) else {
            return;
        };
        for (name, parameter) in self.parameters() {
            if let Some(value) = saved.get(&name) {
                parameter.load_json(value);
            }
        }
    }
}

/// Re-keys child parameters under `prefix.`.
pub fn prefix_parameters<'a>(
    prefix: &str,
    parameters: IndexMap<String, &'a Parameter>,
) -> IndexMap<String, &'a Parameter> {
    parameters
        .into_iter()
        .map(|(name, parameter)| (join_path(prefix, &name), parameter))
        .collect()
}

/// Re-keys child predictors under `prefix.`.
pub fn prefix_predictors<'a>(
    prefix: &str,
    predictors: Vec<(String, &'a Predict)>,
) -> Vec<(String, &'a Predict)> {
    predictors
        .into_iter()
        .map(|(name, predictor)| (join_path(prefix, &name), predictor))
        .collect()
}

fn join_path(prefix: &str, name: &str) -> String {
    if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct TwoSlot {
        demos: Parameter,
        extra: Parameter,
    }

    #[async_trait]
    impl Module for TwoSlot {
        async fn forward(&self, _inputs: Example) -> Result<Prediction, PredictError> {
            Ok(Prediction::default())
        }

        fn parameters(&self) -> IndexMap<String, &Parameter> {
            IndexMap::from([
                ("demos".to_string(), &self.demos),
                ("extra".to_string(), &self.extra),
            ])
        }
    }

    #[test]
    fn save_load_round_trip() {
        let module = TwoSlot {
            demos: Parameter::with_value(json!(["d1"])),
            extra: Parameter::new(),
        };

        let state = module.save_state();
        assert_eq!(state["compiled"], json!(true));
        assert_eq!(state["parameters"]["demos"], json!(["d1"]));
        assert_eq!(state["parameters"]["extra"], Value::Null);

        let fresh = TwoSlot {
            demos: Parameter::new(),
            extra: Parameter::new(),
        };
        fresh.load_state(&state);
        assert_eq!(fresh.demos.value(), Some(json!(["d1"])));
        assert!(!fresh.extra.is_set());
    }

    #[test]
    fn load_state_ignores_unknown_names() {
        let module = TwoSlot {
            demos: Parameter::new(),
            extra: Parameter::new(),
        };
        module.load_state(&json!({
            "parameters": { "no_such_slot": [1, 2], "demos": ["kept"] },
            "compiled": true
        }));
        assert_eq!(module.demos.value(), Some(json!(["kept"])));
    }

    #[test]
    fn reset_clears_all_parameters() {
        let module = TwoSlot {
            demos: Parameter::with_value(json!(1)),
            extra: Parameter::with_value(json!(2)),
        };
        module.reset();
        assert!(!module.demos.is_set());
        assert!(!module.extra.is_set());
    }

    #[test]
    fn prefixing_joins_with_dots() {
        let parameter = Parameter::new();
        let map = IndexMap::from([("demos".to_string(), &parameter)]);
        let prefixed = prefix_parameters("inner", map);
        assert!(prefixed.contains_key("inner.demos"));
    }
}
