use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};

use crate::core::errors::PredictError;
use crate::core::module::{Module, prefix_parameters, prefix_predictors};
use crate::core::parameter::Parameter;
use crate::core::signature::{Field, Signature};
use crate::data::{Example, Prediction};
use crate::lm::LM;

use super::predict::Predict;

/// Compares M independent reasoning attempts and produces one corrected
/// answer.
///
/// The signature gains `reasoning_attempt_1..M` inputs plus a leading
/// `rationale` output; callers pass the attempts as a `completions` input
/// holding the M predictions to compare.
#[derive(Clone)]
pub struct MultiChainComparison {
    predict: Predict,
    m: usize,
}

impl MultiChainComparison {
    pub fn new(signature: Signature, m: usize) -> Self {
        let mut extended = signature;
        for i in 1..=m {
            let _ = extended.push(
                Field::input(format!("reasoning_attempt_{i}"))
                    .with_desc(format!("candidate reasoning attempt #{i}")),
            );
        }
        let _ = extended.prepend(
            Field::output("rationale")
                .with_prefix("Rationale:")
                .with_desc("weigh the attempts against each other before answering"),
        );
        Self {
            predict: Predict::new(extended),
            m,
        }
    }

    pub fn with_lm(mut self, lm: Arc<LM>) -> Self {
        self.predict = self.predict.with_lm(lm);
        self
    }

    /// The reasoning text of one attempt: `reasoning`, then `rationale`,
    /// then the first field.
    fn attempt_reasoning(completion: &IndexMap<String, Value>) -> String {
        let value = completion
            .get("reasoning")
            .or_else(|| completion.get("rationale"))
            .or_else(|| completion.values().next());
        match value {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

#[async_trait]
impl Module for MultiChainComparison {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        let completions = match inputs.get("completions") {
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(PredictError::InvalidInput {
                    field: "completions".to_string(),
                    reason: "expected a list of predictions".to_string(),
                });
            }
            None => {
                return Err(PredictError::MissingInput {
                    field: "completions".to_string(),
                });
            }
        };
        if completions.len() != self.m {
            return Err(PredictError::InvalidInput {
                field: "completions".to_string(),
                reason: format!("expected {} completions, got {}", self.m, completions.len()),
            });
        }

        let mut predict_inputs = inputs.clone();
        predict_inputs.inputs.shift_remove("completions");

        for (i, completion) in completions.iter().enumerate() {
            let Some(fields) = completion.as_object() else {
                return Err(PredictError::InvalidInput {
                    field: "completions".to_string(),
                    reason: format!("completion #{} is not an object", i + 1),
                });
            };
            let fields: IndexMap<String, Value> =
                fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let reasoning = Self::attempt_reasoning(&fields);
            predict_inputs.inputs.insert(
                format!("reasoning_attempt_{}", i + 1),
                json!(format!("«{reasoning}»")),
            );
        }

        let mut prediction = self.predict.forward(predict_inputs).await?;
        prediction
            .metadata
            .insert("num_chains".to_string(), json!(self.m));
        prediction
            .metadata
            .insert("comparison_method".to_string(), json!("multi_chain"));
        Ok(prediction)
    }

    fn parameters(&self) -> IndexMap<String, &Parameter> {
        prefix_parameters("predict", self.predict.parameters())
    }

    fn predictors(&self) -> Vec<(String, &Predict)> {
        prefix_predictors("predict", self.predict.predictors())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::lm::{LMConfig, StaticProvider};

    fn canned_lm(reply: &str) -> Arc<LM> {
        Arc::new(LM::with_provider(
            LMConfig::default(),
            Arc::new(StaticProvider::text(reply)),
        ))
    }

    #[test]
    fn signature_gains_attempt_slots_and_rationale() {
        let mcc = MultiChainComparison::new(Signature::parse("question -> answer").unwrap(), 3);
        let signature = mcc.predict.signature();
        assert!(signature.input_fields.contains_key("reasoning_attempt_1"));
        assert!(signature.input_fields.contains_key("reasoning_attempt_3"));
        assert_eq!(
            signature.output_fields.keys().next().map(String::as_str),
            Some("rationale")
        );
    }

    #[tokio::test]
    async fn missing_completions_is_a_validation_error() {
        let mcc = MultiChainComparison::new(Signature::parse("question -> answer").unwrap(), 2)
            .with_lm(canned_lm("unused"));
        let err = mcc
            .forward(Example::new().with_input("question", "q"))
            .await
            .unwrap_err();
        assert!(matches!(err, PredictError::MissingInput { field } if field == "completions"));
    }

    #[tokio::test]
    async fn wrong_arity_is_rejected() {
        let mcc = MultiChainComparison::new(Signature::parse("question -> answer").unwrap(), 2)
            .with_lm(canned_lm("unused"));
        let err = mcc
            .forward(
                Example::new()
                    .with_input("question", "q")
                    .with_input("completions", json!([{"answer": "only one"}])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PredictError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn attempts_are_bound_guillemet_wrapped() {
        let provider = Arc::new(StaticProvider::text("Rationale: second is right\nanswer: 4"));
        let lm = Arc::new(LM::with_provider(LMConfig::default(), provider.clone()));
        let mcc = MultiChainComparison::new(Signature::parse("question -> answer").unwrap(), 2)
            .with_lm(lm);

        let prediction = mcc
            .forward(
                Example::new()
                    .with_input("question", "2+2?")
                    .with_input(
                        "completions",
                        json!([
                            {"reasoning": "it is 3", "answer": "3"},
                            {"rationale": "it is 4", "answer": "4"}
                        ]),
                    ),
            )
            .await
            .unwrap();

        assert_eq!(prediction.metadata["num_chains"], json!(2));
        assert_eq!(prediction.metadata["comparison_method"], json!("multi_chain"));

        let sent = provider.requests()[0].messages.last().unwrap().content().to_string();
        assert!(sent.contains("«it is 3»"));
        assert!(sent.contains("«it is 4»"));
    }
}
