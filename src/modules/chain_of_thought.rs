use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::core::errors::PredictError;
use crate::core::module::{Module, prefix_parameters, prefix_predictors};
use crate::core::parameter::Parameter;
use crate::core::signature::{Field, Signature};
use crate::data::{Example, Prediction};
use crate::lm::LM;

use super::Predict;

/// Step-by-step prompting: the signature gains a leading `reasoning`
/// output field, so the model explains itself before answering.
///
/// The reasoning text is also copied into the prediction's metadata for
/// callers that only look at the declared outputs.
#[derive(Clone)]
pub struct ChainOfThought {
    predict: Predict,
}

impl ChainOfThought {
    pub fn new(signature: Signature) -> Self {
        let mut extended = signature;
        // Prepending keeps reasoning first so the model reasons before it
        // commits to an answer.
        let _ = extended.prepend(
            Field::output("reasoning")
                .with_prefix("Reasoning:")
                .with_desc("think step by step before producing the other fields"),
        );
        Self {
            predict: Predict::new(extended),
        }
    }

    pub fn with_lm(mut self, lm: Arc<LM>) -> Self {
        self.predict = self.predict.with_lm(lm);
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.predict = self.predict.with_instruction(instruction);
        self
    }

    pub fn predict(&self) -> &Predict {
        &self.predict
    }
}

#[async_trait]
impl Module for ChainOfThought {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        let mut prediction = self.predict.forward(inputs).await?;
        if let Some(reasoning) = prediction.get("reasoning").cloned() {
            prediction.metadata.insert("reasoning".to_string(), reasoning);
        }
        Ok(prediction)
    }

    fn parameters(&self) -> IndexMap<String, &Parameter> {
        prefix_parameters("predict", self.predict.parameters())
    }

    fn predictors(&self) -> Vec<(String, &Predict)> {
        prefix_predictors("predict", self.predict.predictors())
    }
}
