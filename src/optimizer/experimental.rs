//! Optimizers whose heavy machinery (policy gradients, Bayesian search,
//! trusted monitors, joint weight/prompt training) lives outside this
//! crate. Each one keeps the [`Optimizer`] contract and degrades to a
//! scored copy-and-return, so callers can wire them in today and swap the
//! internals later.

use bon::Builder;
use tracing::info;

use crate::core::errors::CompileError;
use crate::core::module::Module;
use crate::data::Example;
use crate::evaluate::Metric;

use super::{Optimizer, ensure_trainset, evaluate_candidate, require_metric};

async fn scored_copy<M>(
    name: &str,
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
    let score = evaluate_candidate(&compiled, trainset, metric).await?;
    info!(optimizer = name, score, "baseline evaluation (search body not wired in)");
    Ok(compiled)
}

/// Group-relative policy optimization. Reserved: requires a weight-training
/// backend.
#[derive(Builder)]
pub struct GRPO {
    #[builder(default = 4)]
    pub group_size: usize,
}

impl Default for GRPO {
    fn default() -> Self {
        GRPO::builder().build()
    }
}

impl Optimizer for GRPO {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        scored_copy("grpo", module, trainset, metric).await
    }
}

/// Tool-using-agent optimizer with a comparator monitor. Reserved.
#[derive(Builder)]
pub struct AvatarOptimizer {
    #[builder(default = 10)]
    pub max_iters: usize,
}

impl Default for AvatarOptimizer {
    fn default() -> Self {
        AvatarOptimizer::builder().build()
    }
}

impl Optimizer for AvatarOptimizer {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        scored_copy("avatar", module, trainset, metric).await
    }
}

/// Hyperparameter search over compiled programs via an external Bayesian
/// optimization service. Reserved.
#[derive(Builder)]
pub struct OptunaSearch {
    #[builder(default = 20)]
    pub num_trials: usize,
}

impl Default for OptunaSearch {
    fn default() -> Self {
        OptunaSearch::builder().build()
    }
}

impl Optimizer for OptunaSearch {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        scored_copy("optuna", module, trainset, metric).await
    }
}

/// Alternating prompt/weight optimization. Reserved: the weight half needs
/// a finetuning backend.
#[derive(Builder)]
pub struct BetterTogether {
    #[builder(default = 2)]
    pub rounds: usize,
}

impl Default for BetterTogether {
    fn default() -> Self {
        BetterTogether::builder().build()
    }
}

impl Optimizer for BetterTogether {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        scored_copy("better_together", module, trainset, metric).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::evaluate::exact_match;
    use crate::optimizer::demo_parameters;

    #[tokio::test]
    async fn stubs_return_untouched_scored_copies() {
        let module = TwoLeaf::new();
        let trainset = echo_trainset(2);
        let metric = exact_match("answer");

        let grpo = GRPO::default().compile(&module, &trainset, Some(&metric)).await;
        let avatar = AvatarOptimizer::default()
            .compile(&module, &trainset, Some(&metric))
            .await;
        let optuna = OptunaSearch::default()
            .compile(&module, &trainset, Some(&metric))
            .await;
        let together = BetterTogether::default()
            .compile(&module, &trainset, Some(&metric))
            .await;

        for compiled in [grpo, avatar, optuna, together] {
            let compiled = compiled.unwrap();
            for (_, parameter) in demo_parameters(&compiled) {
                assert!(!parameter.is_set());
            }
        }
    }

    #[tokio::test]
    async fn stubs_enforce_the_shared_contract() {
        let module = TwoLeaf::new();
        assert!(matches!(
            GRPO::default()
                .compile(&module, &[], Some(&exact_match("answer")))
                .await,
            Err(CompileError::EmptyTrainset)
        ));
        assert!(matches!(
            OptunaSearch::default()
                .compile(&module, &echo_trainset(1), None)
                .await,
            Err(CompileError::MissingMetric)
        ));
    }
}
