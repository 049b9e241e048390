use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::core::errors::PredictError;
use crate::data::Prediction;
use crate::utils::text::normalize_answer;

/// How a set of predictions collapses to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationStrategy {
    /// Mode over the normalized view of the chosen field.
    #[default]
    Majority,
    /// Reserved: currently identical to majority voting.
    Weighted,
    /// All predictions must agree under normalization.
    Consensus,
}

type NormalizeFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Reduces a list of predictions to a single one.
///
/// The vote runs over one field — the explicitly chosen one, or the first
/// field of the first prediction — normalized by lowercase+trim unless a
/// custom normalizer is supplied.
#[derive(Clone)]
pub struct Aggregate {
    strategy: AggregationStrategy,
    field: Option<String>,
    normalize: NormalizeFn,
}

impl Default for Aggregate {
    fn default() -> Self {
        Self::new(AggregationStrategy::Majority)
    }
}

impl Aggregate {
    pub fn new(strategy: AggregationStrategy) -> Self {
        Self {
            strategy,
            field: None,
            normalize: Arc::new(|text| normalize_answer(text)),
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_normalizer<F>(mut self, normalize: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.normalize = Arc::new(normalize);
        self
    }

    fn vote_field(&self, predictions: &[Prediction]) -> Result<String, PredictError> {
        if let Some(field) = self.field.clone() {
            return Ok(field);
        }
        predictions
            .first()
            .and_then(|prediction| prediction.fields.keys().next().cloned())
            .ok_or_else(|| PredictError::InvalidInput {
                field: "predictions".to_string(),
                reason: "first prediction has no fields".to_string(),
            })
    }

    /// Collapses `predictions` according to the strategy.
    pub fn reduce(&self, predictions: &[Prediction]) -> Result<Prediction, PredictError> {
        if predictions.is_empty() {
            return Err(PredictError::InvalidInput {
                field: "predictions".to_string(),
                reason: "nothing to aggregate".to_string(),
            });
        }
        let field = self.vote_field(predictions)?;
        let normalized: Vec<String> = predictions
            .iter()
            .map(|prediction| (self.normalize)(&prediction.get_text(&field)))
            .collect();

        match self.strategy {
            AggregationStrategy::Majority | AggregationStrategy::Weighted => {
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for value in &normalized {
                    *counts.entry(value.as_str()).or_default() += 1;
                }
                // Mode; first-seen wins ties.
                let mut winner_index = 0;
                for (i, value) in normalized.iter().enumerate() {
                    if counts[value.as_str()] > counts[normalized[winner_index].as_str()] {
                        winner_index = i;
                    }
                }
                let winner = &normalized[winner_index];

                let mut prediction = predictions[winner_index].clone();
                prediction
                    .metadata
                    .insert("majority_count".to_string(), json!(counts[winner.as_str()]));
                prediction
                    .metadata
                    .insert("total_predictions".to_string(), json!(predictions.len()));
                prediction.metadata.insert(
                    "aggregation_strategy".to_string(),
                    json!(match self.strategy {
                        AggregationStrategy::Weighted => "weighted",
                        _ => "majority",
                    }),
                );
                Ok(prediction)
            }
            AggregationStrategy::Consensus => {
                let first = &normalized[0];
                if normalized.iter().all(|value| value == first) {
                    let mut prediction = predictions[0].clone();
                    prediction.metadata.insert("consensus".to_string(), json!(true));
                    prediction
                        .metadata
                        .insert("total_predictions".to_string(), json!(predictions.len()));
                    Ok(prediction)
                } else {
                    Err(PredictError::NoConsensus { field })
                }
            }
        }
    }
}
