use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::errors::PredictError;
use crate::core::module::{Module, prefix_parameters, prefix_predictors};
use crate::core::parameter::Parameter;
use crate::core::signature::{Field, FieldType, Signature};
use crate::data::{Example, Prediction};
use crate::lm::LM;

use super::chain_of_thought::ChainOfThought;
use super::predict::Predict;

pub const DEFAULT_ASPECTS: [&str; 3] = ["accuracy", "clarity", "completeness"];
pub const DEFAULT_CONVERGENCE: f64 = 0.05;

/// LM-driven self-critique around an inner module.
///
/// Each round: run the inner module, ask a critique predictor to score the
/// response per aspect (0.0–1.0), average the scores, and keep iterating
/// while the improvement over the previous round exceeds the convergence
/// threshold. The best-scored response wins; every round's score and
/// critique lands in `reflection_history`.
#[derive(Clone)]
pub struct Reflection {
    inner: Arc<dyn Module>,
    critique: ChainOfThought,
    aspects: Vec<String>,
    max_iters: usize,
    convergence_threshold: f64,
}

impl Reflection {
    pub fn new(inner: Arc<dyn Module>) -> Self {
        Self::with_aspects(
            inner,
            DEFAULT_ASPECTS.iter().map(|aspect| aspect.to_string()).collect(),
        )
    }

    pub fn with_aspects(inner: Arc<dyn Module>, aspects: Vec<String>) -> Self {
        let critique = ChainOfThought::new(critique_signature(&aspects));
        Self {
            inner,
            critique,
            aspects,
            max_iters: 3,
            convergence_threshold: DEFAULT_CONVERGENCE,
        }
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters.max(1);
        self
    }

    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    pub fn with_lm(mut self, lm: Arc<LM>) -> Self {
        self.critique = self.critique.with_lm(lm);
        self
    }

    /// Mean of the aspect scores in a critique prediction. Unparseable
    /// aspects count as 0.5, a neutral grade.
    fn aspect_score(&self, critique: &Prediction) -> f64 {
        if self.aspects.is_empty() {
            return 0.5;
        }
        let total: f64 = self
            .aspects
            .iter()
            .map(|aspect| match critique.get(aspect) {
                Some(Value::Number(number)) => number.as_f64().unwrap_or(0.5),
                Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.5),
                _ => 0.5,
            })
            .sum();
        (total / self.aspects.len() as f64).clamp(0.0, 1.0)
    }
}

fn critique_signature(aspects: &[String]) -> Signature {
    let mut signature = Signature::new("reflect").with_instruction(format!(
        "Critique the response below. Score each of {} from 0.0 to 1.0.",
        aspects.join(", ")
    ));
    signature
        .push(Field::input("response").with_desc("the response under review"))
        .expect("fresh signature accepts response");
    signature
        .push(
            Field::output("critique")
                .with_prefix("Critique:")
                .with_desc("what is wrong and how to improve it"),
        )
        .expect("fresh output");
    for aspect in aspects {
        signature
            .push(
                Field::output(aspect.clone())
                    .with_prefix(format!("{aspect}:"))
                    .with_type(FieldType::Float),
            )
            .expect("aspect names are unique");
    }
    signature
}

fn render_response(prediction: &Prediction) -> String {
    prediction
        .fields
        .iter()
        .map(|(name, value)| match value {
            Value::String(s) => format!("{name}: {s}"),
            other => format!("{name}: {other}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Module for Reflection {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        let mut best: Option<(f64, Prediction)> = None;
        let mut previous_score: Option<f64> = None;
        let mut history: Vec<Value> = Vec::new();
        let mut feedback: Option<String> = None;

        for iteration in 0..self.max_iters {
            let mut attempt_inputs = inputs.clone();
            if let Some(feedback) = feedback.as_ref() {
                attempt_inputs
                    .inputs
                    .insert("feedback".to_string(), json!(feedback));
            }

            let candidate = self.inner.forward(attempt_inputs).await?;

            let critique = self
                .critique
                .forward(Example::new().with_input("response", render_response(&candidate)))
                .await?;
            let score = self.aspect_score(&critique);
            let critique_text = critique.get_text("critique");
            debug!(iteration, score, "reflection round scored");

            history.push(json!({
                "iteration": iteration + 1,
                "score": score,
                "critique": critique_text,
            }));

            if best.as_ref().map(|(b, _)| score > *b).unwrap_or(true) {
                best = Some((score, candidate));
            }

            // Stop once another round is unlikely to pay for itself.
            if let Some(previous) = previous_score
                && score - previous < self.convergence_threshold
            {
                break;
            }
            previous_score = Some(score);
            feedback = Some(critique_text);
        }

        let (score, mut prediction) = best.expect("at least one round ran");
        prediction
            .metadata
            .insert("reflection_score".to_string(), json!(score));
        prediction
            .metadata
            .insert("reflection_history".to_string(), Value::Array(history));
        Ok(prediction)
    }

    fn parameters(&self) -> IndexMap<String, &Parameter> {
        prefix_parameters("critique", self.critique.parameters())
    }

    fn predictors(&self) -> Vec<(String, &Predict)> {
        prefix_predictors("critique", self.critique.predictors())
    }
}
