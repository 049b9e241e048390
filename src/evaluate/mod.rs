//! Metrics and batch evaluation.

pub mod evaluator;

pub use evaluator::*;

use async_trait::async_trait;

use crate::data::{Example, Prediction};

/// How optimizers and evaluators learn what "good" means: a score for one
/// (gold example, prediction) pair, higher is better.
#[async_trait]
pub trait Metric: Send + Sync {
    async fn score(&self, example: &Example, prediction: &Prediction) -> anyhow::Result<f64>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "metric"
    }
}

/// Wraps a plain scoring function as a [`Metric`].
pub struct MetricFn<F> {
    name: String,
    score: F,
}

impl<F> MetricFn<F>
where
    F: Fn(&Example, &Prediction) -> f64 + Send + Sync,
{
    pub fn new(name: impl Into<String>, score: F) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

#[async_trait]
impl<F> Metric for MetricFn<F>
where
    F: Fn(&Example, &Prediction) -> f64 + Send + Sync,
{
    async fn score(&self, example: &Example, prediction: &Prediction) -> anyhow::Result<f64> {
        Ok((self.score)(example, prediction))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Exact match on one output field after lowercase+trim normalization.
pub fn exact_match(field: &'static str) -> MetricFn<impl Fn(&Example, &Prediction) -> f64> {
    MetricFn::new(format!("exact_match({field})"), move |example, prediction| {
        let gold = crate::utils::text::normalize_answer(&example.get_text(field));
        let got = crate::utils::text::normalize_answer(&prediction.get_text(field));
        if !gold.is_empty() && gold == got { 1.0 } else { 0.0 }
    })
}

/// Arithmetic mean, `0.0` for an empty slice.
pub fn average(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_match_normalizes() {
        let metric = exact_match("answer");
        let example = Example::new().with_output("answer", "Paris");
        let prediction = Prediction::default().with_field("answer", "  paris ");
        assert_eq!(metric.score(&example, &prediction).await.unwrap(), 1.0);

        let wrong = Prediction::default().with_field("answer", "London");
        assert_eq!(metric.score(&example, &wrong).await.unwrap(), 0.0);
    }

    #[test]
    fn average_of_empty_is_zero() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(average(&[1.0, 0.0]), 0.5);
    }
}
