use bon::Builder;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::core::errors::CompileError;
use crate::core::module::Module;
use crate::data::{Example, Prediction};
use crate::evaluate::Metric;

use super::{
    Optimizer, demo_from_run, ensure_trainset, evaluate_candidate, example_inputs,
    require_metric, set_all_demos,
};

/// One scored execution of the program during candidate generation.
#[derive(Clone, Debug)]
pub struct Trace {
    pub inputs: Example,
    pub prediction: Prediction,
    pub score: f64,
}

/// A candidate configuration: an instruction plus a demo set.
#[derive(Clone, Debug)]
pub struct PromptCandidate {
    pub instruction: String,
    pub demos: Vec<Example>,
    pub score: f64,
}

/// Prompting heuristics mixed into generated instructions.
pub struct PromptingTips {
    pub tips: Vec<String>,
}

impl PromptingTips {
    pub fn default_tips() -> Self {
        Self {
            tips: [
                "State the task in one direct sentence before any detail",
                "Name the exact output format expected",
                "Work through the problem before committing to an answer",
                "Call out edge cases the input might contain",
                "Prefer concrete wording over abstractions",
                "Say what to avoid as well as what to do",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// MIPROv2: trace-guided instruction + demo search.
///
/// The program first runs over the trainset to collect scored traces.
/// Candidates pair an instruction variant (base instruction crossed with a
/// prompting tip) with a demo set mined from the best traces and labeled
/// examples. `num_trials` random trials score candidate assignments on
/// minibatches; the best assignment is applied to the compiled copy.
#[derive(Builder)]
pub struct MIPROv2 {
    #[builder(default = 10)]
    pub num_candidates: usize,
    #[builder(default = 3)]
    pub max_bootstrapped_demos: usize,
    #[builder(default = 3)]
    pub max_labeled_demos: usize,
    #[builder(default = 20)]
    pub num_trials: usize,
    #[builder(default = 4)]
    pub minibatch_size: usize,
    #[builder(default = 0)]
    pub seed: u64,
}

impl Default for MIPROv2 {
    fn default() -> Self {
        MIPROv2::builder().build()
    }
}

impl MIPROv2 {
    async fn collect_traces<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: &dyn Metric,
    ) -> Vec<Trace>
    where
        M: Module + Clone + Send + Sync,
    {
        let mut traces = Vec::with_capacity(trainset.len());
        for example in trainset {
            let Ok(prediction) = module.forward(example_inputs(example)).await else {
                continue;
            };
            let score = metric.score(example, &prediction).await.unwrap_or(0.0);
            traces.push(Trace {
                inputs: example.clone(),
                prediction,
                score,
            });
        }
        traces
    }

    fn build_candidates(
        &self,
        base_instruction: &str,
        traces: &[Trace],
        trainset: &[Example],
        rng: &mut StdRng,
    ) -> Vec<PromptCandidate> {
        let tips = PromptingTips::default_tips();

        let mut successes: Vec<&Trace> = traces.iter().filter(|t| t.score > 0.0).collect();
        successes.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut candidates = Vec::with_capacity(self.num_candidates.max(1));
        for index in 0..self.num_candidates.max(1) {
            let instruction = if index == 0 {
                base_instruction.to_string()
            } else {
                let tip = &tips.tips[(index - 1) % tips.tips.len()];
                format!("{base_instruction}\n\nHint: {tip}.")
            };

            let mut demos: Vec<Example> = successes
                .iter()
                .skip(index % successes.len().max(1))
                .take(self.max_bootstrapped_demos)
                .map(|trace| demo_from_run(&trace.inputs, &trace.prediction))
                .collect();
            let mut labeled = trainset.to_vec();
            labeled.shuffle(rng);
            demos.extend(labeled.into_iter().take(self.max_labeled_demos));

            candidates.push(PromptCandidate {
                instruction,
                demos,
                score: 0.0,
            });
        }
        candidates
    }

    fn apply_candidate<M: Module>(module: &M, candidate: &PromptCandidate) {
        for (_, predictor) in module.predictors() {
            predictor.set_instruction(candidate.instruction.clone());
        }
        set_all_demos(module, &candidate.demos);
    }
}

impl Optimizer for MIPROv2 {
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
        let base_instruction = compiled
            .predictors()
            .first()
            .map(|(_, predictor)| predictor.instruction())
            .unwrap_or_default();

        let traces = self.collect_traces(&compiled, trainset, metric).await;
        debug!(traces = traces.len(), "trace collection complete");

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut candidates =
            self.build_candidates(&base_instruction, &traces, trainset, &mut rng);

        let mut best: Option<(f64, usize)> = None;
        for trial in 0..self.num_trials.max(1) {
            let index = (trial + trial / candidates.len()) % candidates.len();

            let mut minibatch = trainset.to_vec();
            minibatch.shuffle(&mut rng);
            minibatch.truncate(self.minibatch_size.max(1));

            Self::apply_candidate(&compiled, &candidates[index]);
            let score = evaluate_candidate(&compiled, &minibatch, metric).await?;
            candidates[index].score = candidates[index].score.max(score);
            debug!(trial, candidate = index, score, "mipro trial scored");

            if best.as_ref().map(|(b, _)| score > *b).unwrap_or(true) {
                best = Some((score, index));
            }
        }

        let (_, winner) = best.ok_or(CompileError::NoViableCandidate)?;
        Self::apply_candidate(&compiled, &candidates[winner]);
        Ok(compiled)
    }
}
