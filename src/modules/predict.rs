use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::adapter::Adapter;
use crate::core::errors::PredictError;
use crate::core::module::Module;
use crate::core::parameter::Parameter;
use crate::core::settings::Settings;
use crate::core::signature::Signature;
use crate::data::{Example, Prediction};
use crate::trace::{self, TraceStep};

/// The leaf module: one signature, one LM call.
///
/// Everything else in the crate composes `Predict`s. Its two tunable knobs
/// are the `demos` parameter (few-shot examples prepended by the adapter)
/// and an instruction override that optimizers write through shared
/// references.
pub struct Predict {
    signature: Signature,
    demos: Parameter,
    instruction_override: RwLock<Option<String>>,
    adapter: Option<Arc<dyn Adapter>>,
    lm: Option<Arc<crate::lm::LM>>,
}

impl std::fmt::Debug for Predict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predict")
            .field("signature", &self.signature)
            .field("demos", &self.demos)
            .field("instruction_override", &self.instruction_override)
            .field("adapter", &self.adapter.as_ref().map(|_| "<adapter>"))
            .field("lm", &self.lm.as_ref().map(|_| "<lm>"))
            .finish()
    }
}

impl Predict {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            demos: Parameter::new(),
            instruction_override: RwLock::new(None),
            adapter: None,
            lm: None,
        }
    }

    /// Pins a specific LM instead of the one in settings.
    pub fn with_lm(mut self, lm: Arc<crate::lm::LM>) -> Self {
        self.lm = Some(lm);
        self
    }

    /// Pins a specific adapter instead of following settings. This is how a
    /// two-step adapter (which needs its own extraction LM) gets attached.
    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_instruction(self, instruction: impl Into<String>) -> Self {
        self.set_instruction(instruction);
        self
    }

    pub fn with_demos(self, demos: Vec<Example>) -> Self {
        self.set_demos(demos);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The instruction in effect: the optimizer override when present,
    /// otherwise the signature's own.
    pub fn instruction(&self) -> String {
        self.instruction_override
            .read()
            .expect("instruction lock poisoned")
            .clone()
            .unwrap_or_else(|| self.signature.task_instruction())
    }

    pub fn set_instruction(&self, instruction: impl Into<String>) {
        *self
            .instruction_override
            .write()
            .expect("instruction lock poisoned") = Some(instruction.into());
    }

    pub fn clear_instruction(&self) {
        *self
            .instruction_override
            .write()
            .expect("instruction lock poisoned") = None;
    }

    /// Current demos decoded from the parameter slot.
    pub fn demos(&self) -> Vec<Example> {
        match self.demos.value() {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_demos(&self, demos: Vec<Example>) {
        let encoded: Vec<Value> = demos
            .iter()
            .map(|demo| serde_json::to_value(demo).expect("examples serialize"))
            .collect();
        self.demos.set_value(Value::Array(encoded));
    }

    /// Signature with the instruction override applied, as handed to the
    /// adapter.
    fn effective_signature(&self) -> Signature {
        let mut signature = self.signature.clone();
        if let Some(instruction) = self
            .instruction_override
            .read()
            .expect("instruction lock poisoned")
            .clone()
        {
            signature.instruction = instruction;
        }
        signature
    }

    fn validate_inputs(&self, inputs: &Example) -> Result<(), PredictError> {
        for field in self.signature.input_fields.values() {
            if field.required && inputs.get(&field.name).is_none() {
                return Err(PredictError::MissingInput {
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }

    #[tracing::instrument(
        name = "teleprompt.predict.forward",
        level = "debug",
        skip(self, inputs),
        fields(signature = %self.signature, demo_count = self.demos().len())
    )]
    async fn call(&self, inputs: Example) -> Result<Prediction, PredictError> {
        self.validate_inputs(&inputs)?;

        let settings = Settings::snapshot();
        let lm = match self.lm.clone() {
            Some(lm) => lm,
            None => settings.require_lm()?,
        };
        let adapter = self
            .adapter
            .clone()
            .unwrap_or_else(|| settings.adapter.instantiate());

        let signature = self.effective_signature();
        let demos = self.demos();
        let mut request = adapter.format(&signature, &inputs, &demos)?;
        if request.temperature == 0.0 {
            request.temperature = settings.temperature;
        }
        if request.max_tokens == 0 {
            request.max_tokens = settings.max_tokens;
        }
        trace!(messages = request.messages.len(), "prompt formatted");

        let response = lm.call(request).await?;

        let fields = adapter
            .parse(&signature, &response)
            .await
            .map_err(|source| PredictError::Parse {
                raw_response: response.content().to_string(),
                source,
            })?;
        debug!(output_fields = fields.len(), "response parsed");

        let prediction = Prediction::new(fields).with_usage(response.usage.clone());

        if settings.trace || trace::is_active() {
            trace::record(TraceStep {
                predictor: signature.name.clone(),
                inputs: inputs.inputs.clone(),
                outputs: prediction.fields.clone(),
            });
        }

        Ok(prediction)
    }
}

impl Clone for Predict {
    fn clone(&self) -> Self {
        Self {
            signature: self.signature.clone(),
            demos: self.demos.clone(),
            instruction_override: RwLock::new(
                self.instruction_override
                    .read()
                    .expect("instruction lock poisoned")
                    .clone(),
            ),
            adapter: self.adapter.clone(),
            lm: self.lm.clone(),
        }
    }
}

#[async_trait]
impl Module for Predict {
    async fn forward(&self, inputs: Example) -> Result<Prediction, PredictError> {
        self.call(inputs).await
    }

    fn parameters(&self) -> IndexMap<String, &Parameter> {
        IndexMap::from([("demos".to_string(), &self.demos)])
    }

    fn predictors(&self) -> Vec<(String, &Predict)> {
        vec![(String::new(), self)]
    }
}
