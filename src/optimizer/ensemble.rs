use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use serde_json::json;

use crate::core::errors::PredictError;
use crate::core::module::Module;
use crate::data::{Example, Prediction};

/// Combines several predictions into one.
pub type ReduceFn = Arc<dyn Fn(Vec<Prediction>) -> Prediction + Send + Sync>;

/// Wraps a set of pre-compiled modules into one fan-out module.
///
/// Unlike the other teleprompters this one takes already-compiled programs
/// rather than a trainset — its job is combination, not search.
#[derive(Builder)]
pub struct Ensemble {
    /// Run only a random subsample of this many members per call.
    pub size: Option<usize>,
    /// Reduction applied to the member predictions. Without one, the
    /// first prediction wins and the rest ride along in metadata.
    pub reduce: Option<ReduceFn>,
    #[builder(default = 0)]
    pub seed: u64,
}

impl Default for Ensemble {
    fn default() -> Self {
        Ensemble::builder().build()
    }
}

impl Ensemble {
    pub fn compile(&self, members: Vec<Arc<dyn Module>>) -> EnsembledModule {
        EnsembledModule {
            members,
            size: self.size,
            reduce: self.reduce.clone(),
            seed: self.seed,
        }
    }
}

/// The compiled fan-out program produced by [`Ensemble::compile`].
#[derive(Clone)]
pub struct EnsembledModule {
    members: Vec<Arc<dyn Module>>,
    size: Option<usize>,
    reduce: Option<ReduceFn>,
    seed: u64,
}

impl EnsembledModule {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl Module for EnsembledModule {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        if self.members.is_empty() {
            return Err(PredictError::InvalidInput {
                field: "ensemble".to_string(),
                reason: "no member modules".to_string(),
            });
        }

        let mut chosen: Vec<&Arc<dyn Module>> = self.members.iter().collect();
        if let Some(size) = self.size
            && size < chosen.len()
        {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
            chosen.shuffle(&mut rng);
            chosen.truncate(size.max(1));
        }

        let mut predictions = Vec::with_capacity(chosen.len());
        for member in chosen {
            predictions.push(member.forward(inputs.clone()).await?);
        }

        match self.reduce.as_ref() {
            Some(reduce) => Ok(reduce(predictions)),
            None => {
                let mut first = predictions.remove(0);
                first.metadata.insert(
                    "ensemble_predictions".to_string(),
                    json!(
                        predictions
                            .iter()
                            .map(|prediction| json!(prediction.fields))
                            .collect::<Vec<_>>()
                    ),
                );
                first
                    .metadata
                    .insert("ensemble_size".to_string(), json!(1 + predictions.len()));
                Ok(first)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{Aggregate, AggregationStrategy};

    struct Fixed(&'static str);

    #[async_trait]
    impl Module for Fixed {
        async fn forward(&self, _inputs: Example) -> Result<Prediction, PredictError> {
            Ok(Prediction::default().with_field("answer", self.0))
        }
    }

    fn members() -> Vec<Arc<dyn Module>> {
        vec![
            Arc::new(Fixed("paris")),
            Arc::new(Fixed("Paris")),
            Arc::new(Fixed("london")),
        ]
    }

    #[tokio::test]
    async fn default_reduction_keeps_first_and_stashes_rest() {
        let ensembled = Ensemble::default().compile(members());
        let prediction = ensembled.forward(Example::new()).await.unwrap();
        assert_eq!(prediction.get_text("answer"), "paris");
        assert_eq!(prediction.metadata["ensemble_size"], json!(3));
        assert_eq!(
            prediction.metadata["ensemble_predictions"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn custom_reduction_runs_majority_vote() {
        let reduce: ReduceFn = Arc::new(|predictions| {
            Aggregate::new(AggregationStrategy::Majority)
                .reduce(&predictions)
                .expect("non-empty ensemble")
        });
        let ensembled = Ensemble::builder().reduce(reduce).build().compile(members());
        let prediction = ensembled.forward(Example::new()).await.unwrap();
        assert_eq!(prediction.metadata["majority_count"], json!(2));
    }

    #[tokio::test]
    async fn subsampling_limits_members() {
        let ensembled = Ensemble::builder().size(2).build().compile(members());
        let prediction = ensembled.forward(Example::new()).await.unwrap();
        assert_eq!(prediction.metadata["ensemble_size"], json!(2));
    }

    #[tokio::test]
    async fn empty_ensemble_is_rejected() {
        let ensembled = Ensemble::default().compile(Vec::new());
        assert!(ensembled.forward(Example::new()).await.is_err());
    }
}
