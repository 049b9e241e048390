use bon::Builder;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::core::errors::CompileError;
use crate::core::module::Module;
use crate::data::Example;
use crate::evaluate::Metric;

use super::{
    Optimizer, bandit, ensure_trainset, evaluate_candidate, require_metric, set_all_demos,
};

/// How SIMBA picks the next arm to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ArmSelection {
    /// UCB1 with the configured exploration constant.
    #[default]
    Ucb,
    /// Thompson sampling over Beta posteriors of the observed scores.
    Thompson,
    /// ε-greedy; `adaptive` decays ε as `ε/(1+0.1t)`.
    EpsilonGreedy { epsilon: f64, adaptive: bool },
    /// Softmax over arm means at the given temperature.
    Softmax { temperature: f64 },
}

/// Stochastic bandit over perturbed program copies.
///
/// `num_candidates` arms are built up front — the unmodified copy plus
/// seeded demo-set perturbations — then `max_steps` rounds of arm
/// selection each evaluate one arm on a random minibatch and update its
/// statistics. The arm with the best observed mean wins.
#[derive(Builder)]
pub struct SIMBA {
    #[builder(default = 8)]
    pub num_candidates: usize,
    #[builder(default = 12)]
    pub max_steps: usize,
    #[builder(default = 4)]
    pub minibatch_size: usize,
    #[builder(default = 2.0)]
    pub exploration: f64,
    #[builder(default)]
    pub selection: ArmSelection,
    #[builder(default = 4)]
    pub max_demos: usize,
    #[builder(default = 0)]
    pub seed: u64,
}

impl Default for SIMBA {
    fn default() -> Self {
        SIMBA::builder().build()
    }
}

impl SIMBA {
    /// Arm 0 is the unmodified copy; every further arm gets a distinct
    /// seeded demo draw.
    fn build_arms<M>(&self, module: &M, trainset: &[Example], rng: &mut StdRng) -> Vec<M>
    where
        M: Module + Clone,
    {
        let mut arms = Vec::with_capacity(self.num_candidates.max(1));
        arms.push(module.clone());
        for arm in 1..self.num_candidates.max(1) {
            let copy = module.clone();
            let mut shuffled = trainset.to_vec();
            shuffled.shuffle(rng);
            let count = 1 + (arm % self.max_demos.max(1));
            let demos: Vec<Example> = shuffled.into_iter().take(count).collect();
            set_all_demos(&copy, &demos);
            arms.push(copy);
        }
        arms
    }

    fn select_arm(
        &self,
        step: usize,
        counts: &[u64],
        means: &[f64],
        successes: &[f64],
        failures: &[f64],
        rng: &mut StdRng,
    ) -> usize {
        match self.selection {
            ArmSelection::Ucb => bandit::select_ucb1(counts, means, self.exploration),
            ArmSelection::Thompson => bandit::select_thompson(successes, failures, rng),
            ArmSelection::EpsilonGreedy { epsilon, adaptive } => {
                let epsilon = if adaptive {
                    bandit::adaptive_epsilon(epsilon, step)
                } else {
                    epsilon
                };
                bandit::select_epsilon_greedy(means, epsilon, rng)
            }
            ArmSelection::Softmax { temperature } => {
                bandit::select_softmax(means, temperature, rng)
            }
        }
    }
}

impl Optimizer for SIMBA {
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

        let mut rng = StdRng::seed_from_u64(self.seed);
        let arms = self.build_arms(module, trainset, &mut rng);
        let arm_count = arms.len();

        let mut counts = vec![0u64; arm_count];
        let mut totals = vec![0.0f64; arm_count];
        let mut successes = vec![0.0f64; arm_count];
        let mut failures = vec![0.0f64; arm_count];

        for step in 0..self.max_steps {
            let means: Vec<f64> = counts
                .iter()
                .zip(&totals)
                .map(|(&count, &total)| if count == 0 { 0.0 } else { total / count as f64 })
                .collect();
            let arm = self.select_arm(step, &counts, &means, &successes, &failures, &mut rng);

            let mut minibatch = trainset.to_vec();
            minibatch.shuffle(&mut rng);
            minibatch.truncate(self.minibatch_size.max(1));

            let score = evaluate_candidate(&arms[arm], &minibatch, metric).await?;
            debug!(step, arm, score, "simba arm evaluated");

            counts[arm] += 1;
            totals[arm] += score;
            successes[arm] += score;
            failures[arm] += 1.0 - score;
        }

        let means: Vec<f64> = counts
            .iter()
            .zip(&totals)
            .map(|(&count, &total)| if count == 0 { f64::MIN } else { total / count as f64 })
            .collect();
        let best = means
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(arm, _)| arm)
            .ok_or(CompileError::NoViableCandidate)?;
        debug!(best, "simba winner");

        Ok(arms.into_iter().nth(best).expect("index from enumerate"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::evaluate::exact_match;
    use crate::optimizer::demo_parameters;

    #[tokio::test]
    async fn bandit_run_returns_an_arm_and_preserves_original() {
        let module = TwoLeaf::new();
        let optimizer = SIMBA::builder()
            .num_candidates(3)
            .max_steps(4)
            .minibatch_size(2)
            .build();

        let compiled = optimizer
            .compile(&module, &echo_trainset(6), Some(&exact_match("answer")))
            .await
            .unwrap();
        let _ = compiled;

        for (_, parameter) in demo_parameters(&module) {
            assert!(!parameter.is_set());
        }
    }

    #[tokio::test]
    async fn all_selection_strategies_run() {
        let module = TwoLeaf::new();
        for selection in [
            ArmSelection::Ucb,
            ArmSelection::Thompson,
            ArmSelection::EpsilonGreedy {
                epsilon: 0.3,
                adaptive: true,
            },
            ArmSelection::Softmax { temperature: 0.5 },
        ] {
            let optimizer = SIMBA::builder()
                .num_candidates(2)
                .max_steps(3)
                .minibatch_size(2)
                .selection(selection)
                .build();
            let compiled = optimizer
                .compile(&module, &echo_trainset(4), Some(&exact_match("answer")))
                .await;
            assert!(compiled.is_ok());
        }
    }

    #[tokio::test]
    async fn requires_metric() {
        let module = TwoLeaf::new();
        assert!(matches!(
            SIMBA::default().compile(&module, &echo_trainset(2), None).await,
            Err(CompileError::MissingMetric)
        ));
    }
}
