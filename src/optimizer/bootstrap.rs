use std::sync::Arc;

use bon::Builder;
use tracing::debug;

use crate::core::errors::CompileError;
use crate::core::module::Module;
use crate::data::Example;
use crate::evaluate::Metric;
use crate::trace;

use super::{
    Optimizer, demo_from_run, ensure_trainset, example_inputs, require_metric, set_all_demos,
};

/// Bootstrapped few-shot compilation.
///
/// Runs the teacher (or, absent one, the student itself) over the
/// trainset, keeps runs the metric accepts, and installs those runs as
/// demos on every Predict leaf, topped up with raw labeled examples up to
/// `max_labeled`. `max_bootstrapped == 0` leaves every demo slot untouched.
#[derive(Builder)]
pub struct BootstrapFewShot {
    #[builder(default = 4)]
    pub max_bootstrapped: usize,
    #[builder(default = 16)]
    pub max_labeled: usize,
    #[builder(default = 1)]
    pub max_rounds: usize,
    /// Stronger program to generate demos from. Defaults to the student.
    pub teacher: Option<Arc<dyn Module>>,
    /// Minimum metric score for a run to count as a success.
    #[builder(default = 0.0)]
    pub threshold: f64,
}

impl Default for BootstrapFewShot {
    fn default() -> Self {
        BootstrapFewShot::builder().build()
    }
}

impl BootstrapFewShot {
    /// Mines successful runs from the trainset, capped at `limit`.
    async fn bootstrap_demos<M>(
        &self,
        student: &M,
        trainset: &[Example],
        metric: &dyn Metric,
        limit: usize,
    ) -> Result<Vec<Example>, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        let mut demos = Vec::new();
        for round in 0..self.max_rounds.max(1) {
            for example in trainset {
                if demos.len() >= limit {
                    return Ok(demos);
                }
                let outcome = match self.teacher.as_ref() {
                    Some(teacher) => teacher.forward(example_inputs(example)).await,
                    None => student.forward(example_inputs(example)).await,
                };
                let prediction = match outcome {
                    Ok(prediction) => prediction,
                    Err(err) => {
                        debug!(round, error = %err, "bootstrap run failed, skipping");
                        continue;
                    }
                };
                let score = metric
                    .score(example, &prediction)
                    .await
                    .unwrap_or(f64::NEG_INFINITY);
                if score > self.threshold {
                    demos.push(demo_from_run(example, &prediction));
                }
            }
        }
        Ok(demos)
    }
}

impl Optimizer for BootstrapFewShot {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        ensure_trainset(trainset)?;
        let metric = require_metric(metric)?;

        let compiled = module.clone();
        if self.max_bootstrapped == 0 {
            return Ok(compiled);
        }

        let mut demos = self
            .bootstrap_demos(&compiled, trainset, metric, self.max_bootstrapped)
            .await?;
        debug!(bootstrapped = demos.len(), "bootstrap pass complete");

        for example in trainset.iter().take(self.max_labeled) {
            demos.push(example.clone());
        }

        set_all_demos(&compiled, &demos);
        Ok(compiled)
    }
}

/// Bootstrap variant that mines *per-leaf* demos from execution traces.
///
/// Each trainset example runs under the trace sink; when the final
/// prediction scores above the threshold, every recorded predictor step
/// becomes a demo for the leaves whose signature name matches the step's
/// hint (steps without a hint go to every leaf).
#[derive(Builder)]
pub struct BootstrapTrace {
    #[builder(default = 4)]
    pub max_bootstrapped: usize,
    #[builder(default = 0.5)]
    pub threshold: f64,
}

impl Default for BootstrapTrace {
    fn default() -> Self {
        BootstrapTrace::builder().build()
    }
}

impl Optimizer for BootstrapTrace {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        ensure_trainset(trainset)?;
        let metric = require_metric(metric)?;

        let compiled = module.clone();
        if self.max_bootstrapped == 0 {
            return Ok(compiled);
        }

        let mut kept_steps: Vec<trace::TraceStep> = Vec::new();
        for example in trainset {
            let (outcome, steps) =
                trace::with_trace(compiled.forward(example_inputs(example))).await;
            let Ok(prediction) = outcome else {
                continue;
            };
            let score = metric.score(example, &prediction).await.unwrap_or(0.0);
            if score > self.threshold {
                kept_steps.extend(steps);
            }
        }
        debug!(steps = kept_steps.len(), "trace mining complete");

        for (path, predictor) in compiled.predictors() {
            let signature_name = predictor.signature().name.clone();
            let demos: Vec<Example> = kept_steps
                .iter()
                .filter(|step| {
                    step.predictor.is_empty()
                        || step.predictor == signature_name
                        || step.predictor == path
                })
                .take(self.max_bootstrapped)
                .map(|step| Example {
                    inputs: step.inputs.clone(),
                    outputs: step.outputs.clone(),
                    metadata: indexmap::IndexMap::new(),
                })
                .collect();
            if !demos.is_empty() {
                predictor.set_demos(demos);
            }
        }

        Ok(compiled)
    }
}
