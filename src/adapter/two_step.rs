use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::core::errors::{AdapterError, ConfigError, ParseError};
use crate::core::signature::{Field, Signature};
use crate::data::Example;
use crate::lm::{Chat, LM, LMRequest, LMResponse, Message};

use super::{Adapter, ChatAdapter};

/// Two-phase protocol for models that answer best in free prose.
///
/// Phase 1 sends a natural-language prompt and lets the model answer
/// however it likes. Phase 2 builds a synthetic `text -> outputs`
/// extraction signature and runs [`ChatAdapter`] against a dedicated
/// extraction LM to recover the typed fields from that prose.
pub struct TwoStepAdapter {
    extraction_lm: Arc<LM>,
    extractor: ChatAdapter,
}

impl TwoStepAdapter {
    /// Fails with [`ConfigError::MissingExtractionLm`] when no extraction
    /// LM is supplied.
    pub fn new(extraction_lm: Option<Arc<LM>>) -> Result<Self, ConfigError> {
        let extraction_lm = extraction_lm.ok_or(ConfigError::MissingExtractionLm)?;
        Ok(Self {
            extraction_lm,
            extractor: ChatAdapter,
        })
    }

    fn prose_system_message(&self, signature: &Signature) -> String {
        let outputs = signature
            .output_fields
            .values()
            .map(|field| {
                if field.desc.is_empty() {
                    format!("the {}", field.name)
                } else {
                    format!("the {} ({})", field.name, field.desc)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}\n\nAnswer in plain prose. Make sure your answer mentions {outputs}.",
            signature.task_instruction()
        )
    }

    fn prose_user_message(&self, signature: &Signature, example: &Example) -> String {
        signature
            .input_fields
            .keys()
            .map(|name| format!("{name}: {}", example.get_text(name)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The synthetic phase-2 signature: one `text` input carrying the
    /// phase-1 prose, the original output fields unchanged.
    fn extraction_signature(&self, signature: &Signature) -> Signature {
        let mut extraction = Signature::new("extract")
            .with_instruction(format!(
                "The text below is a model's answer to a task. Extract {}.",
                signature
                    .output_fields
                    .keys()
                    .map(|name| format!("`{name}`"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        extraction
            .push(Field::input("text").with_desc("the answer to extract fields from"))
            .expect("fresh signature accepts text input");
        for field in signature.output_fields.values() {
            extraction
                .push(field.clone())
                .expect("output names are unique by signature invariant");
        }
        extraction
    }
}

#[async_trait]
impl Adapter for TwoStepAdapter {
    fn name(&self) -> &'static str {
        "two_step"
    }

    fn format(
        &self,
        signature: &Signature,
        inputs: &Example,
        demos: &[Example],
    ) -> Result<LMRequest, AdapterError> {
        signature
            .validate()
            .map_err(|err| AdapterError::SignatureMisuse {
                adapter: self.name(),
                reason: err.to_string(),
            })?;

        let mut chat = Chat::default();
        chat.push(Message::system(self.prose_system_message(signature)));
        for demo in demos {
            chat.push(Message::user(self.prose_user_message(signature, demo)));
            chat.push(Message::assistant(
                signature
                    .output_fields
                    .keys()
                    .map(|name| demo.get_text(name))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ));
        }
        chat.push(Message::user(self.prose_user_message(signature, inputs)));

        Ok(LMRequest::from_chat(chat))
    }

    async fn parse(
        &self,
        signature: &Signature,
        response: &LMResponse,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        let extraction_signature = self.extraction_signature(signature);
        let extraction_inputs = Example::new().with_input("text", response.content());

        let request = self
            .extractor
            .format(&extraction_signature, &extraction_inputs, &[])
            .map_err(|err| ParseError::ExtractionFailed {
                field: String::new(),
                raw_response: response.content().to_string(),
                reason: err.to_string(),
            })?;

        debug!("two-step extraction call");
        let extraction_response =
            self.extraction_lm
                .call(request)
                .await
                .map_err(|err| ParseError::ExtractionFailed {
                    field: String::new(),
                    raw_response: response.content().to_string(),
                    reason: err.to_string(),
                })?;

        self.extractor
            .parse(&extraction_signature, &extraction_response)
            .await
    }
}
