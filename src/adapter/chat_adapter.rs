use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::core::errors::{AdapterError, ParseError};
use crate::core::signature::Signature;
use crate::data::Example;
use crate::lm::{Chat, LMRequest, LMResponse, Message};

use super::{Adapter, coerce_value, whole_reply_fallback};

/// The default adapter: line-oriented field rendering.
///
/// Every field appears as `<prefix> <value>` on its own line; demos become
/// alternating user/assistant turns before the live inputs. Parsing scans
/// the reply for each output field's prefix and takes the text up to the
/// next recognized prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatAdapter;

impl ChatAdapter {
    fn system_message(&self, signature: &Signature) -> String {
        let mut lines = vec!["Your input fields are:".to_string()];
        for (i, field) in signature.input_fields.values().enumerate() {
            lines.push(field_attribute_line(i, field));
        }
        lines.push("Your output fields are:".to_string());
        for (i, field) in signature.output_fields.values().enumerate() {
            lines.push(field_attribute_line(i, field));
        }
        lines.push(String::new());
        lines.push(
            "Reply with each output field on its own line as `<prefix> <value>`, \
             in the order listed."
                .to_string(),
        );
        lines.push(String::new());
        lines.push(format!("Your objective is: {}", signature.task_instruction()));
        lines.join("\n")
    }

    fn render_inputs(&self, signature: &Signature, example: &Example) -> String {
        signature
            .input_fields
            .values()
            .map(|field| format!("{} {}", field.prefix, example.get_text(&field.name)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_outputs(&self, signature: &Signature, example: &Example) -> String {
        signature
            .output_fields
            .values()
            .map(|field| format!("{} {}", field.prefix, example.get_text(&field.name)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn field_attribute_line(index: usize, field: &crate::core::signature::Field) -> String {
    let mut line = format!("{}. `{}` ({})", index + 1, field.name, field.ty);
    if !field.desc.is_empty() {
        line.push_str(&format!(": {}", field.desc));
    }
    line
}

#[async_trait]
impl Adapter for ChatAdapter {
    fn name(&self) -> &'static str {
        "chat"
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
            chat.push(Message::user(self.render_inputs(signature, demo)));
            chat.push(Message::assistant(self.render_outputs(signature, demo)));
        }
        chat.push(Message::user(self.render_inputs(signature, inputs)));

        Ok(LMRequest::from_chat(chat))
    }

    async fn parse(
        &self,
        signature: &Signature,
        response: &LMResponse,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        let content = response.content();

        // Every recognized prefix with its position, in reply order.
        let mut markers: Vec<(usize, &str)> = Vec::new();
        for field in signature.output_fields.values() {
            if let Some(at) = content.find(&field.prefix) {
                markers.push((at, field.name.as_str()));
            }
        }
        markers.sort_by_key(|(at, _)| *at);

        if markers.is_empty() {
            return Ok(whole_reply_fallback(signature, content));
        }

        let mut outputs = IndexMap::new();
        for (i, (at, name)) in markers.iter().enumerate() {
            let field = &signature.output_fields[*name];
            let start = at + field.prefix.len();
            let end = markers
                .get(i + 1)
                .map(|(next, _)| *next)
                .unwrap_or(content.len());
            let text = &content[start..end.max(start)];
            outputs.insert(field.name.clone(), coerce_value(field, text));
        }

        // Reply order may differ from declaration order; normalize.
        let mut ordered = IndexMap::new();
        for name in signature.output_fields.keys() {
            if let Some(value) = outputs.shift_remove(name) {
                ordered.insert(name.clone(), value);
            }
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn qa() -> Signature {
        Signature::parse("question -> answer").unwrap()
    }

    #[tokio::test]
    async fn format_renders_prefix_lines() {
        let inputs = Example::new().with_input("question", "What is Go?");
        let request = ChatAdapter.format(&qa(), &inputs, &[]).unwrap();

        // System + one user turn.
        assert_eq!(request.messages.len(), 2);
        let user = request.messages.last().unwrap();
        assert_eq!(user.role(), "user");
        assert_eq!(user.content(), "question: What is Go?");
    }

    #[tokio::test]
    async fn format_interleaves_demos() {
        let demos = vec![
            Example::new()
                .with_input("question", "1+1?")
                .with_output("answer", "2"),
        ];
        let inputs = Example::new().with_input("question", "2+2?");
        let request = ChatAdapter.format(&qa(), &inputs, &demos).unwrap();

        let roles: Vec<_> = request.messages.messages.iter().map(|m| m.role()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(request.messages.messages[2].content(), "answer: 2");
    }

    #[tokio::test]
    async fn parse_extracts_prefixed_fields() {
        let response = LMResponse::assistant("m", "answer: Go is a language");
        let outputs = ChatAdapter.parse(&qa(), &response).await.unwrap();
        assert_eq!(outputs["answer"], json!("Go is a language"));
    }

    #[tokio::test]
    async fn parse_splits_on_next_prefix() {
        let signature = Signature::parse("question -> reasoning, answer").unwrap();
        let response =
            LMResponse::assistant("m", "reasoning: it is 2+2\nanswer: 4\n");
        let outputs = ChatAdapter.parse(&signature, &response).await.unwrap();
        assert_eq!(outputs["reasoning"], json!("it is 2+2"));
        assert_eq!(outputs["answer"], json!("4"));
    }

    #[tokio::test]
    async fn parse_without_prefixes_binds_first_field() {
        let response = LMResponse::assistant("m", "just some prose");
        let outputs = ChatAdapter.parse(&qa(), &response).await.unwrap();
        assert_eq!(outputs["answer"], json!("just some prose"));
    }

    #[tokio::test]
    async fn format_rejects_invalid_signature() {
        let mut signature = Signature::default();
        signature
            .push(crate::core::signature::Field::input("only_input"))
            .unwrap();
        let err = ChatAdapter
            .format(&signature, &Example::new(), &[])
            .unwrap_err();
        assert!(matches!(err, AdapterError::SignatureMisuse { .. }));
    }
}
