use bon::Builder;
use rand::{Rng, SeedableRng};
use rand::seq::SliceRandom;
use tracing::debug;

use crate::core::errors::CompileError;
use crate::core::module::Module;
use crate::data::Example;
use crate::evaluate::Metric;

use super::{
    BootstrapFewShot, LabeledFewShot, Optimizer, ensure_trainset, evaluate_candidate,
    require_metric,
};

/// Random search over few-shot configurations.
///
/// Sweeps seeds `-3..num_candidates`: −3 is the zero-shot copy, −2 plain
/// labeled few-shot, −1 unshuffled bootstrap, and every seed ≥ 0 a
/// shuffled bootstrap with a seeded random demo count in
/// `[min_num_samples, max_bootstrapped_demos]`. Each candidate is scored
/// on the validation set (the trainset when none is given) and the argmax
/// wins; `stop_at_score` short-circuits the sweep.
#[derive(Builder)]
pub struct RandomSearch {
    #[builder(default = 16)]
    pub num_candidates: usize,
    #[builder(default = 4)]
    pub max_bootstrapped_demos: usize,
    #[builder(default = 16)]
    pub max_labeled_demos: usize,
    #[builder(default = 1)]
    pub min_num_samples: usize,
    pub stop_at_score: Option<f64>,
    #[builder(default)]
    pub valset: Vec<Example>,
}

impl Default for RandomSearch {
    fn default() -> Self {
        RandomSearch::builder().build()
    }
}

impl Optimizer for RandomSearch {
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
        let evalset: &[Example] = if self.valset.is_empty() {
            trainset
        } else {
            &self.valset
        };

        let mut best: Option<(f64, M)> = None;

        for seed in -3..self.num_candidates as i64 {
            let candidate = match seed {
                -3 => {
                    let zero_shot = module.clone();
                    zero_shot.reset();
                    zero_shot
                }
                -2 => {
                    LabeledFewShot::builder()
                        .k(self.max_labeled_demos)
                        .build()
                        .compile(module, trainset, Some(metric))
                        .await?
                }
                -1 => {
                    BootstrapFewShot::builder()
                        .max_bootstrapped(self.max_bootstrapped_demos)
                        .max_labeled(self.max_labeled_demos)
                        .build()
                        .compile(module, trainset, Some(metric))
                        .await?
                }
                seed => {
                    let mut rng = rand::rngs::StdRng::seed_from_u64(seed as u64);
                    let mut shuffled = trainset.to_vec();
                    shuffled.shuffle(&mut rng);
                    let size = rng.gen_range(
                        self.min_num_samples.min(self.max_bootstrapped_demos)
                            ..=self.max_bootstrapped_demos.max(1),
                    );
                    BootstrapFewShot::builder()
                        .max_bootstrapped(size)
                        .max_labeled(self.max_labeled_demos)
                        .build()
                        .compile(module, &shuffled, Some(metric))
                        .await?
                }
            };

            let score = evaluate_candidate(&candidate, evalset, metric).await?;
            debug!(seed, score, "random search candidate scored");

            if best.as_ref().map(|(b, _)| score > *b).unwrap_or(true) {
                best = Some((score, candidate));
            }
            if let Some(stop_at) = self.stop_at_score
                && best.as_ref().map(|(b, _)| *b >= stop_at).unwrap_or(false)
            {
                debug!(score = best.as_ref().map(|(b, _)| *b), "early stop");
                break;
            }
        }

        best.map(|(_, candidate)| candidate)
            .ok_or(CompileError::NoViableCandidate)
    }
}
