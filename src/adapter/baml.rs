use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::core::errors::{AdapterError, ParseError};
use crate::core::signature::{Field, Signature};
use crate::data::Example;
use crate::lm::{Chat, LMRequest, LMResponse, Message};

use super::json::{lookup_key, recover_json_object};
use super::{Adapter, coerce_value, render_value, whole_reply_fallback};

/// Marker-delimited protocol: every field travels inside a
/// `[[ ## name ## ]]` block and the reply ends with the
/// `[[ ## completed ## ]]` sentinel. Complex values are JSON-encoded inside
/// their markers. Parsing falls back to the JSON recovery stack when no
/// markers are present.
#[derive(Debug, Clone, Copy, Default)]
pub struct BamlAdapter;

fn marker(name: &str) -> String {
    format!("[[ ## {name} ## ]]")
}

impl BamlAdapter {
    fn system_message(&self, signature: &Signature) -> String {
        let mut message = String::from("Your input fields are:\n");
        for (i, field) in signature.input_fields.values().enumerate() {
            message.push_str(&attribute_line(i, field));
            message.push('\n');
        }
        message.push_str("\nYour output fields are:\n");
        for (i, field) in signature.output_fields.values().enumerate() {
            message.push_str(&attribute_line(i, field));
            message.push('\n');
        }

        message.push_str(
            "\nAll interactions will be structured in the following way, \
             with the appropriate values filled in.\n\n",
        );
        for field in signature
            .input_fields
            .values()
            .chain(signature.output_fields.values())
        {
            message.push_str(&marker(&field.name));
            message.push('\n');
            message.push_str(&field.name);
            if !field.ty.is_text() {
                message.push_str(&format!(
                    "\t# note: the value you produce must be a single {} value",
                    field.ty
                ));
            }
            message.push_str("\n\n");
        }
        message.push_str(&marker("completed"));
        message.push('\n');

        message.push_str(&format!(
            "\nIn adhering to this structure, your objective is:\n\t{}",
            signature.task_instruction()
        ));
        message
    }

    fn render_fields<'a>(
        &self,
        fields: impl Iterator<Item = &'a Field>,
        example: &Example,
    ) -> String {
        let mut body = String::new();
        for field in fields {
            body.push_str(&marker(&field.name));
            body.push('\n');
            let value = example.get(&field.name).cloned().unwrap_or(Value::Null);
            body.push_str(&render_value(&value));
            body.push_str("\n\n");
        }
        body
    }

    fn user_message(&self, signature: &Signature, example: &Example) -> String {
        let mut message = self.render_fields(signature.input_fields.values(), example);

        let names: Vec<_> = signature.output_fields.keys().collect();
        message.push_str(&format!(
            "Respond with the corresponding output fields, starting with the field `{}`",
            names[0]
        ));
        for name in &names[1..] {
            message.push_str(&format!(", then `{name}`"));
        }
        message.push_str(", and then ending with the marker for `completed`.");
        message
    }

    fn assistant_message(&self, signature: &Signature, example: &Example) -> String {
        let mut message = self.render_fields(signature.output_fields.values(), example);
        message.push_str(&marker("completed"));
        message
    }

    /// Extracts the block between a field's marker and the next marker (or
    /// end of content).
    fn extract_marked(&self, content: &str, name: &str) -> Option<String> {
        let after = content.split(&marker(name)).nth(1)?;
        let block = after.split("[[ ## ").next().unwrap_or(after);
        Some(block.trim().to_string())
    }
}

fn attribute_line(index: usize, field: &Field) -> String {
    let mut line = format!("{}. `{}` ({})", index + 1, field.name, field.ty);
    if !field.desc.is_empty() {
        line.push_str(&format!(": {}", field.desc));
    }
    line
}

#[async_trait]
impl Adapter for BamlAdapter {
    fn name(&self) -> &'static str {
        "baml"
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
            chat.push(Message::user(self.user_message(signature, demo)));
            chat.push(Message::assistant(self.assistant_message(signature, demo)));
        }
        chat.push(Message::user(self.user_message(signature, inputs)));

        Ok(LMRequest::from_chat(chat))
    }

    async fn parse(
        &self,
        signature: &Signature,
        response: &LMResponse,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        let content = response.content();

        let mut outputs = IndexMap::new();
        for field in signature.output_fields.values() {
            if let Some(text) = self.extract_marked(content, &field.name) {
                outputs.insert(field.name.clone(), coerce_value(field, &text));
            }
        }
        if !outputs.is_empty() {
            return Ok(outputs);
        }

        // No markers at all: inherit the JSON recovery stack.
        if let Ok(object) = recover_json_object(content) {
            for field in signature.output_fields.values() {
                match lookup_key(&object, &field.name) {
                    Some(Value::String(text)) => {
                        outputs.insert(field.name.clone(), coerce_value(field, text));
                    }
                    Some(value) => {
                        outputs.insert(field.name.clone(), value.clone());
                    }
                    None => {}
                }
            }
            if !outputs.is_empty() {
                return Ok(outputs);
            }
        }

        Ok(whole_reply_fallback(signature, content))
    }
}
