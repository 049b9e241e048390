use bon::Builder;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::core::errors::PredictError;
use crate::core::module::Module;
use crate::data::Example;
use crate::evaluate::{Metric, average};

/// Outcome of one evaluation run. `scores` is in devset order with `None`
/// at slots where the forward or the metric failed.
#[derive(Debug, Clone, Default)]
pub struct EvaluationResult {
    pub scores: Vec<Option<f64>>,
    pub mean: f64,
    pub error_count: usize,
}

/// Runs a module over a devset with bounded concurrency and scores every
/// prediction.
///
/// Per-example failures count as errors and score `None` unless
/// `fail_on_error` is set, in which case the first failure aborts the run.
#[derive(Builder)]
pub struct Evaluator {
    #[builder(default = 4)]
    pub num_threads: usize,
    #[builder(default = false)]
    pub fail_on_error: bool,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::builder().build()
    }
}

impl Evaluator {
    #[tracing::instrument(
        name = "teleprompt.evaluate",
        level = "debug",
        skip(self, module, devset, metric),
        fields(examples = devset.len(), metric = metric.name())
    )]
    pub async fn evaluate<M>(
        &self,
        module: &M,
        devset: &[Example],
        metric: &dyn Metric,
    ) -> Result<EvaluationResult, PredictError>
    where
        M: Module + ?Sized,
    {
        let outcomes: Vec<(usize, Option<f64>, Option<String>)> =
            futures::stream::iter(devset.iter().enumerate().map(|(index, example)| {
                async move {
                    let inputs = Example {
                        inputs: example.inputs.clone(),
                        metadata: example.metadata.clone(),
                        ..Default::default()
                    };
                    match module.forward(inputs).await {
                        Ok(prediction) => match metric.score(example, &prediction).await {
                            Ok(score) => (index, Some(score), None),
                            Err(err) => (index, None, Some(err.to_string())),
                        },
                        Err(err) => (index, None, Some(err.to_string())),
                    }
                }
            }))
            .buffer_unordered(self.num_threads.max(1))
            .collect()
            .await;

        let mut scores = vec![None; devset.len()];
        let mut error_count = 0;
        for (index, score, error) in outcomes {
            if let Some(error) = error {
                error_count += 1;
                warn!(index, error = %error, "evaluation example failed");
                if self.fail_on_error {
                    return Err(PredictError::Exhausted {
                        attempts: index + 1,
                        last: error,
                    });
                }
            }
            scores[index] = score;
        }

        let scored: Vec<f64> = scores.iter().filter_map(|score| *score).collect();
        let mean = average(&scored);
        debug!(mean, error_count, "evaluation complete");

        Ok(EvaluationResult {
            scores,
            mean,
            error_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::data::Prediction;
    use crate::evaluate::exact_match;

    /// Echoes the `question` input into `answer`, failing on "poison".
    struct EchoAnswer;

    #[async_trait]
    impl Module for EchoAnswer {
        async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
            let text = inputs.get_text("question");
            if text == "poison" {
                return Err(PredictError::InvalidInput {
                    field: "question".to_string(),
                    reason: "poisoned".to_string(),
                });
            }
            Ok(Prediction::default().with_field("answer", text))
        }
    }

    fn devset() -> Vec<Example> {
        vec![
            Example::new()
                .with_input("question", "a")
                .with_output("answer", "a"),
            Example::new()
                .with_input("question", "b")
                .with_output("answer", "wrong"),
            Example::new()
                .with_input("question", "poison")
                .with_output("answer", "poison"),
        ]
    }

    #[tokio::test]
    async fn scores_preserve_order_and_tolerate_failures() {
        let result = Evaluator::default()
            .evaluate(&EchoAnswer, &devset(), &exact_match("answer"))
            .await
            .unwrap();

        assert_eq!(result.scores.len(), 3);
        assert_eq!(result.scores[0], Some(1.0));
        assert_eq!(result.scores[1], Some(0.0));
        assert_eq!(result.scores[2], None);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.mean, 0.5);
    }

    #[tokio::test]
    async fn fail_on_error_aborts() {
        let evaluator = Evaluator::builder().fail_on_error(true).build();
        let err = evaluator
            .evaluate(&EchoAnswer, &devset(), &exact_match("answer"))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn labels_are_stripped_from_module_inputs() {
        struct AssertNoOutputs;

        #[async_trait]
        impl Module for AssertNoOutputs {
            async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
                assert!(inputs.outputs.is_empty());
                Ok(Prediction::default().with_field("answer", "x"))
            }
        }

        Evaluator::default()
            .evaluate(&AssertNoOutputs, &devset()[..1], &exact_match("answer"))
            .await
            .unwrap();
    }
}
