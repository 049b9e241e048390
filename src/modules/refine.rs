use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::core::errors::PredictError;
use crate::core::module::Module;
use crate::data::{Example, Prediction};

/// Scores one attempt; higher is better.
pub type RewardFn = Arc<dyn Fn(&Example, &Prediction) -> f64 + Send + Sync>;

/// Iterative self-improvement around any inner module.
///
/// Each attempt is scored by the reward function; a score at or above the
/// threshold returns immediately with `converged` metadata. Otherwise the
/// next attempt sees `feedback`, `previous_outputs`, and `previous_reward`
/// as extra inputs. Up to `fail_count` inner errors are tolerated before
/// the best attempt so far (or an error) is returned.
#[derive(Clone)]
pub struct Refine {
    inner: Arc<dyn Module>,
    reward: RewardFn,
    threshold: f64,
    max_iters: usize,
    fail_count: usize,
}

impl Refine {
    pub fn new(inner: Arc<dyn Module>, reward: RewardFn, threshold: f64, max_iters: usize) -> Self {
        Self {
            inner,
            reward,
            threshold,
            max_iters: max_iters.max(1),
            fail_count: 1,
        }
    }

    pub fn with_fail_count(mut self, fail_count: usize) -> Self {
        self.fail_count = fail_count;
        self
    }
}

#[async_trait]
impl Module for Refine {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        run_attempts(
            self.inner.as_ref(),
            &self.reward,
            &inputs,
            self.max_iters,
            self.fail_count,
            Some(self.threshold),
        )
        .await
    }
}

/// Independent best-of-N sampling: [`Refine`] without the feedback
/// injection between attempts.
#[derive(Clone)]
pub struct BestOfN {
    inner: Arc<dyn Module>,
    reward: RewardFn,
    n: usize,
    fail_count: usize,
}

impl BestOfN {
    pub fn new(inner: Arc<dyn Module>, reward: RewardFn, n: usize) -> Self {
        Self {
            inner,
            reward,
            n: n.max(1),
            fail_count: 1,
        }
    }

    pub fn with_fail_count(mut self, fail_count: usize) -> Self {
        self.fail_count = fail_count;
        self
    }
}

#[async_trait]
impl Module for BestOfN {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        run_attempts(
            self.inner.as_ref(),
            &self.reward,
            &inputs,
            self.n,
            self.fail_count,
            None,
        )
        .await
    }
}

/// Shared attempt loop. `threshold: Some(_)` enables early convergence and
/// feedback injection (Refine); `None` keeps attempts independent (BestOfN).
async fn run_attempts(
    inner: &dyn Module,
    reward: &RewardFn,
    inputs: &Example,
    max_iters: usize,
    fail_count: usize,
    threshold: Option<f64>,
) -> Result<Prediction, PredictError> {
    let mut best: Option<(f64, Prediction)> = None;
    let mut failures = 0usize;
    let mut last_error = String::new();
    let mut attempts = 0usize;

    for iteration in 0..max_iters {
        attempts = iteration + 1;

        let mut attempt_inputs = inputs.clone();
        if threshold.is_some()
            && let Some((previous_reward, previous)) = best.as_ref()
        {
            attempt_inputs.inputs.insert(
                "feedback".to_string(),
                json!(format!(
                    "A previous attempt scored {previous_reward:.3}. Improve on it."
                )),
            );
            attempt_inputs.inputs.insert(
                "previous_outputs".to_string(),
                json!(previous.fields.clone()),
            );
            attempt_inputs
                .inputs
                .insert("previous_reward".to_string(), json!(previous_reward));
        }

        match inner.forward(attempt_inputs).await {
            Ok(prediction) => {
                let score = reward(inputs, &prediction);
                debug!(iteration, score, "attempt scored");

                if let Some(threshold) = threshold
                    && score >= threshold
                {
                    let mut prediction = prediction;
                    prediction.metadata.insert("converged".to_string(), json!(true));
                    prediction
                        .metadata
                        .insert("reward".to_string(), json!(score));
                    prediction
                        .metadata
                        .insert("attempts".to_string(), json!(attempts));
                    return Ok(prediction);
                }

                if best.as_ref().map(|(b, _)| score > *b).unwrap_or(true) {
                    best = Some((score, prediction));
                }
            }
            Err(err) => {
                failures += 1;
                last_error = err.to_string();
                debug!(iteration, failures, error = %last_error, "attempt failed");
                if failures > fail_count {
                    break;
                }
            }
        }
    }

    match best {
        Some((score, mut prediction)) => {
            if threshold.is_some() {
                prediction
                    .metadata
                    .insert("converged".to_string(), json!(false));
            }
            prediction
                .metadata
                .insert("reward".to_string(), json!(score));
            prediction
                .metadata
                .insert("attempts".to_string(), json!(attempts));
            Ok(prediction)
        }
        None => Err(PredictError::Exhausted {
            attempts,
            last: last_error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use indexmap::IndexMap;
    use serde_json::{Value, json};

    use super::*;

    /// Scripted inner module: each call pops the next canned outcome.
    struct Scripted {
        outcomes: std::sync::Mutex<Vec<Result<Prediction, PredictError>>>,
        seen_inputs: std::sync::Mutex<Vec<Example>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Prediction, PredictError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: std::sync::Mutex::new(outcomes),
                seen_inputs: std::sync::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Module for Scripted {
        async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_inputs.lock().unwrap().push(inputs);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(Prediction::default())
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn answer(text: &str) -> Prediction {
        Prediction::new(IndexMap::from([(
            "answer".to_string(),
            Value::String(text.to_string()),
        )]))
    }

    fn length_reward() -> RewardFn {
        Arc::new(|_inputs, prediction| prediction.get_text("answer").len() as f64)
    }

    #[tokio::test]
    async fn refine_converges_early() {
        let inner = Scripted::new(vec![Ok(answer("long enough"))]);
        let refine = Refine::new(inner.clone(), length_reward(), 5.0, 4);

        let prediction = refine.forward(Example::new()).await.unwrap();
        assert_eq!(prediction.metadata["converged"], json!(true));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refine_injects_feedback_between_attempts() {
        let inner = Scripted::new(vec![Ok(answer("ab")), Ok(answer("abcd"))]);
        let refine = Refine::new(inner.clone(), length_reward(), 100.0, 2);

        let prediction = refine.forward(Example::new()).await.unwrap();
        assert_eq!(prediction.metadata["converged"], json!(false));
        assert_eq!(prediction.get_text("answer"), "abcd");

        let second_inputs = &inner.seen_inputs.lock().unwrap()[1];
        assert!(second_inputs.get("feedback").is_some());
        assert_eq!(second_inputs.get("previous_reward"), Some(&json!(2.0)));
        assert!(second_inputs.get("previous_outputs").is_some());
    }

    #[tokio::test]
    async fn best_of_n_keeps_attempts_independent() {
        let inner = Scripted::new(vec![Ok(answer("aaa")), Ok(answer("a"))]);
        let best = BestOfN::new(inner.clone(), length_reward(), 2);

        let prediction = best.forward(Example::new()).await.unwrap();
        assert_eq!(prediction.get_text("answer"), "aaa");
        assert!(prediction.metadata.get("converged").is_none());

        let second_inputs = &inner.seen_inputs.lock().unwrap()[1];
        assert!(second_inputs.get("feedback").is_none());
    }

    #[tokio::test]
    async fn failures_within_budget_are_tolerated() {
        let inner = Scripted::new(vec![
            Err(PredictError::MissingInput {
                field: "x".to_string(),
            }),
            Ok(answer("recovered")),
        ]);
        let best = BestOfN::new(inner, length_reward(), 3).with_fail_count(1);
        let prediction = best.forward(Example::new()).await.unwrap();
        assert_eq!(prediction.get_text("answer"), "recovered");
    }

    #[tokio::test]
    async fn exhausted_when_everything_fails() {
        let inner = Scripted::new(vec![
            Err(PredictError::MissingInput {
                field: "x".to_string(),
            }),
            Err(PredictError::MissingInput {
                field: "x".to_string(),
            }),
        ]);
        let best = BestOfN::new(inner, length_reward(), 4).with_fail_count(1);
        let err = best.forward(Example::new()).await.unwrap_err();
        assert!(matches!(err, PredictError::Exhausted { .. }));
    }
}
