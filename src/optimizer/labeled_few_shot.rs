use bon::Builder;
use rand::SeedableRng;
use rand::seq::SliceRandom;

use crate::core::errors::CompileError;
use crate::core::module::Module;
use crate::data::Example;
use crate::evaluate::Metric;

use super::{Optimizer, set_all_demos};

/// The simplest teleprompter: copy K labeled examples into every `demos`
/// slot.
///
/// With `sample` set, the K examples are a seeded random draw; otherwise
/// the first K. An empty trainset yields an untouched copy rather than an
/// error — there is nothing to sample, and zero-shot is a valid program.
#[derive(Debug, Clone, Builder)]
pub struct LabeledFewShot {
    #[builder(default = 16)]
    pub k: usize,
    #[builder(default = 0)]
    pub seed: u64,
    #[builder(default = false)]
    pub sample: bool,
}

impl Default for LabeledFewShot {
    fn default() -> Self {
        LabeledFewShot::builder().build()
    }
}

impl Optimizer for LabeledFewShot {
    async fn compile<M>(
        &self,
        module: &M,
        trainset: &[Example],
        _metric: Option<&dyn Metric>,
    ) -> Result<M, CompileError>
    where
        M: Module + Clone + Send + Sync,
    {
        let compiled = module.clone();
        if trainset.is_empty() || self.k == 0 {
            return Ok(compiled);
        }

        let demos: Vec<Example> = if self.sample {
            let mut shuffled = trainset.to_vec();
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
            shuffled.shuffle(&mut rng);
            shuffled.into_iter().take(self.k).collect()
        } else {
            trainset.iter().take(self.k).cloned().collect()
        };

        set_all_demos(&compiled, &demos);
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::optimizer::demo_parameters;

    #[tokio::test]
    async fn sets_k_demos_on_every_leaf_without_touching_original() {
        let module = TwoLeaf::new();
        let optimizer = LabeledFewShot::builder().k(3).sample(true).build();

        let compiled = optimizer
            .compile(&module, &echo_trainset(10), None)
            .await
            .unwrap();

        assert_eq!(compiled.first.demos().len(), 3);
        assert_eq!(compiled.second.demos().len(), 3);

        // Purity: the original's parameters stay unset.
        for (_, parameter) in demo_parameters(&module) {
            assert!(!parameter.is_set());
        }
    }

    #[tokio::test]
    async fn unsampled_takes_the_first_k() {
        let module = TwoLeaf::new();
        let optimizer = LabeledFewShot::builder().k(2).build();
        let compiled = optimizer
            .compile(&module, &echo_trainset(5), None)
            .await
            .unwrap();
        let demos = compiled.first.demos();
        assert_eq!(demos[0].get_text("question"), "q0");
        assert_eq!(demos[1].get_text("question"), "q1");
    }

    #[tokio::test]
    async fn sampling_is_seed_deterministic() {
        let module = TwoLeaf::new();
        let optimizer = LabeledFewShot::builder().k(4).sample(true).seed(7).build();
        let a = optimizer
            .compile(&module, &echo_trainset(20), None)
            .await
            .unwrap();
        let b = optimizer
            .compile(&module, &echo_trainset(20), None)
            .await
            .unwrap();
        assert_eq!(a.first.demos(), b.first.demos());
    }

    #[tokio::test]
    async fn empty_trainset_yields_untouched_copy() {
        let module = TwoLeaf::new();
        let compiled = LabeledFewShot::default()
            .compile(&module, &[], None)
            .await
            .unwrap();
        assert!(compiled.first.demos().is_empty());
    }
}
