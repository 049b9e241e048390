use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use tracing::trace;

use crate::core::errors::{AdapterError, ParseError};
use crate::core::signature::Signature;
use crate::data::Example;
use crate::lm::{Chat, LMRequest, LMResponse, Message};

use super::{Adapter, coerce_value};

/// JSON-object protocol: inputs go out as a JSON object, the reply is
/// expected to be one.
///
/// Parsing recovers in stages — strict parse, first balanced `{…}` block,
/// then ```json fence stripping — and matches keys case-insensitively as a
/// final step. In strict mode a missing required output field is a
/// [`ParseError`]; otherwise missing fields are silently dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAdapter {
    pub strict: bool,
}

impl JsonAdapter {
    pub fn strict() -> Self {
        Self { strict: true }
    }

    fn system_message(&self, signature: &Signature) -> String {
        let fields = signature
            .output_fields
            .values()
            .map(|field| {
                let mut line = format!("  \"{}\": {}", field.name, field.ty);
                if !field.desc.is_empty() {
                    line.push_str(&format!(" — {}", field.desc));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n\nRespond with a single JSON object containing exactly these fields:\n{fields}",
            signature.task_instruction()
        )
    }

    fn inputs_object(&self, signature: &Signature, example: &Example) -> Value {
        let mut object = Map::new();
        for name in signature.input_fields.keys() {
            object.insert(
                name.clone(),
                example.get(name).cloned().unwrap_or(Value::Null),
            );
        }
        Value::Object(object)
    }

    fn outputs_object(&self, signature: &Signature, example: &Example) -> Value {
        let mut object = Map::new();
        for name in signature.output_fields.keys() {
            object.insert(
                name.clone(),
                example.get(name).cloned().unwrap_or(Value::Null),
            );
        }
        Value::Object(object)
    }
}

/// Extracts the first balanced `{…}` block by brace counting, ignoring
/// braces inside string literals.
pub(crate) fn first_balanced_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strips a leading ``` or ```json fence and its closing fence.
pub(crate) fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Staged JSON recovery shared with the BAML adapter.
pub(crate) fn recover_json_object(content: &str) -> Result<Map<String, Value>, ParseError> {
    let attempts: [&dyn Fn() -> Option<Value>; 3] = [
        &|| serde_json::from_str(content.trim()).ok(),
        &|| first_balanced_object(content).and_then(|block| serde_json::from_str(block).ok()),
        &|| {
            let stripped = strip_code_fence(content);
            serde_json::from_str(stripped)
                .ok()
                .or_else(|| first_balanced_object(stripped).and_then(|b| serde_json::from_str(b).ok()))
        },
    ];

    for (stage, attempt) in attempts.iter().enumerate() {
        if let Some(Value::Object(object)) = attempt() {
            trace!(stage, "json recovered");
            return Ok(object);
        }
    }

    Err(ParseError::InvalidJson {
        reason: "no JSON object found after all recovery strategies".to_string(),
        raw_response: content.to_string(),
    })
}

/// Case-insensitive key lookup, used as a recovery step after exact match.
pub(crate) fn lookup_key<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

#[async_trait]
impl Adapter for JsonAdapter {
    fn name(&self) -> &'static str {
        "json"
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
        chat.push(Message::system(self.system_message(signature)));
        for demo in demos {
            chat.push(Message::user(
                self.inputs_object(signature, demo).to_string(),
            ));
            chat.push(Message::assistant(
                self.outputs_object(signature, demo).to_string(),
            ));
        }
        chat.push(Message::user(
            self.inputs_object(signature, inputs).to_string(),
        ));

        Ok(LMRequest::from_chat(chat)
            .with_extra("response_format", json!({ "type": "json_object" })))
    }

    async fn parse(
        &self,
        signature: &Signature,
        response: &LMResponse,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        let object = recover_json_object(response.content())?;

        let mut outputs = IndexMap::new();
        for field in signature.output_fields.values() {
            match lookup_key(&object, &field.name) {
                Some(Value::String(text)) => {
                    outputs.insert(field.name.clone(), coerce_value(field, text));
                }
                Some(value) => {
                    outputs.insert(field.name.clone(), value.clone());
                }
                None if self.strict && field.required => {
                    return Err(ParseError::MissingField {
                        field: field.name.clone(),
                        raw_response: response.content().to_string(),
                    });
                }
                None => {}
            }
        }
        Ok(outputs)
    }
}
