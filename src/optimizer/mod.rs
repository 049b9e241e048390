//! Automatic prompt optimization (teleprompters).
//!
//! An optimizer takes a module, a training set, and a metric, and produces
//! a compiled deep copy with better parameters — few-shot demos and/or
//! instructions. The input module is never mutated: compilation clones it
//! and writes through the clone's parameter locks.
//!
//! | Optimizer | Mutates | Strategy |
//! |-----------|---------|----------|
//! | [`LabeledFewShot`] | demos | copy K labeled examples |
//! | [`BootstrapFewShot`] | demos | teacher-run, metric-gated demos |
//! | [`BootstrapTrace`] | demos | per-leaf trace mining |
//! | [`RandomSearch`] | demos | seed sweep over bootstrap configs |
//! | [`COPRO`] | instructions | coordinate ascent, breadth×depth |
//! | [`SIMBA`] | demos | bandit over perturbed copies |
//! | [`InferRules`] | instructions | LM-induced rules appended |
//! | [`Ensemble`] | — | fan-out over pre-compiled modules |
//! | [`MIPROv2`] | both | trace-seeded candidates over trials |

pub mod bandit;
pub mod bootstrap;
pub mod copro;
pub mod ensemble;
pub mod experimental;
pub mod infer_rules;
pub mod labeled_few_shot;
pub mod mipro;
pub mod random_search;
pub mod simba;

pub use bandit::*;
pub use bootstrap::*;
pub use copro::*;
pub use ensemble::*;
pub use experimental::*;
pub use infer_rules::*;
pub use labeled_few_shot::*;
pub use mipro::*;
pub use random_search::*;
pub use simba::*;

use serde_json::Value;

use crate::core::errors::CompileError;
use crate::core::module::Module;
use crate::core::parameter::Parameter;
use crate::data::{Example, Prediction};
use crate::evaluate::{Evaluator, Metric};

/// Compiles a module against a training set.
///
/// The returned module is always a deep copy of the input; the original's
/// parameters are equal before and after. Optimizers that need a metric
/// reject `None` with [`CompileError::MissingMetric`]; all reject an empty
/// trainset (except [`LabeledFewShot`], which returns an untouched copy).
#[allow(async_fn_in_trait)]
pub trait Optimizer {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync;
}

pub(crate) fn ensure_trainset(trainset: &[Example]) -> Result<(), CompileError> {
    if trainset.is_empty() {
        Err(CompileError::EmptyTrainset)
    } else {
        Ok(())
    }
}

pub(crate) fn require_metric<'a>(
    metric: Option<&'a dyn Metric>,
) -> Result<&'a dyn Metric, CompileError> {
    metric.ok_or(CompileError::MissingMetric)
}

/// The `demos` parameter of every Predict leaf, by dotted path.
pub(crate) fn demo_parameters<M: Module>(module: &M) -> Vec<(String, &Parameter)> {
    module
        .parameters()
        .into_iter()
        .filter(|(name, _)| name == "demos" || name.ends_with(".demos"))
        .collect()
}

/// Writes the same demo list into every leaf.
pub(crate) fn set_all_demos<M: Module>(module: &M, demos: &[Example]) {
    let encoded: Vec<Value> = demos
        .iter()
        .map(|demo| serde_json::to_value(demo).expect("examples serialize"))
        .collect();
    for (_, parameter) in demo_parameters(module) {
        parameter.set_value(Value::Array(encoded.clone()));
    }
}

/// A labeled example's inputs only, as handed to forward.
pub(crate) fn example_inputs(example: &Example) -> Example {
    Example {
        inputs: example.inputs.clone(),
        metadata: example.metadata.clone(),
        ..Default::default()
    }
}

/// A demo built from a run: the example's inputs plus the predicted fields
/// as outputs.
pub(crate) fn demo_from_run(example: &Example, prediction: &Prediction) -> Example {
    Example {
        inputs: example.inputs.clone(),
        outputs: prediction.fields.clone(),
        metadata: indexmap::IndexMap::new(),
    }
}

/// Mean metric score of `module` over `trainset`. Per-example failures
/// score zero and the sweep continues — a bad candidate should lose, not
/// abort the search.
pub(crate) async fn evaluate_candidate<M: Module>(
    module: &M,
    trainset: &[Example],
    metric: &dyn Metric,
) -> Result<f64, CompileError> {
    let result = Evaluator::default()
        .evaluate(module, trainset, metric)
        .await
        .map_err(|err| CompileError::Evaluation(anyhow::anyhow!(err)))?;
    let scores: Vec<f64> = result
        .scores
        .iter()
        .map(|score| score.unwrap_or(0.0))
        .collect();
    Ok(crate::evaluate::average(&scores))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn demo_parameters_finds_both_leaves() {
        let module = TwoLeaf::new();
        let demos = demo_parameters(&module);
        let names: Vec<_> = demos.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["first.demos", "second.demos"]);
    }

    #[test]
    fn set_all_demos_reaches_every_leaf() {
        let module = TwoLeaf::new();
        set_all_demos(&module, &echo_trainset(2));
        assert_eq!(module.first.demos().len(), 2);
        assert_eq!(module.second.demos().len(), 2);
    }
}
