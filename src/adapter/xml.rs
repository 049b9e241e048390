use async_trait::async_trait;
use indexmap::IndexMap;
use regex::RegexBuilder;
use serde_json::Value;

use crate::core::errors::{AdapterError, ParseError};
use crate::core::signature::Signature;
use crate::data::Example;
use crate::lm::{Chat, LMRequest, LMResponse, Message};

use super::{Adapter, coerce_value, render_value, whole_reply_fallback};

/// Tag-per-field protocol: the reply is expected to carry each output as
/// `<name>…</name>` under a configurable root tag. Extraction is one regex
/// per field with a case-insensitive retry.
#[derive(Debug, Clone)]
pub struct XmlAdapter {
    pub root_tag: String,
}

impl Default for XmlAdapter {
    fn default() -> Self {
        Self {
            root_tag: "response".to_string(),
        }
    }
}

impl XmlAdapter {
    pub fn with_root(root_tag: impl Into<String>) -> Self {
        Self {
            root_tag: root_tag.into(),
        }
    }

    fn system_message(&self, signature: &Signature) -> String {
        let fields = signature
            .output_fields
            .values()
            .map(|field| {
                let mut line = format!("  <{0}>…</{0}>", field.name);
                if !field.desc.is_empty() {
                    line.push_str(&format!("  <!-- {} -->", field.desc));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n\nRespond with XML of the following shape:\n<{root}>\n{fields}\n</{root}>",
            signature.task_instruction(),
            root = self.root_tag,
        )
    }

    fn render_fields(&self, signature: &Signature, example: &Example, inputs: bool) -> String {
        let fields = if inputs {
            &signature.input_fields
        } else {
            &signature.output_fields
        };
        let body = fields
            .values()
            .map(|field| {
                let value = example.get(&field.name).cloned().unwrap_or(Value::Null);
                format!(
                    "  <{0}>{1}</{0}>",
                    field.name,
                    escape_xml(&render_value(&value))
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let root = if inputs { "input" } else { self.root_tag.as_str() };
        format!("<{root}>\n{body}\n</{root}>")
    }

    fn extract_tag(&self, content: &str, name: &str) -> Option<String> {
        let pattern = format!(r"(?s)<{name}>(.*?)</{name}>", name = regex::escape(name));
        let exact = RegexBuilder::new(&pattern).build().ok()?;
        if let Some(captures) = exact.captures(content) {
            return Some(captures[1].trim().to_string());
        }
        let relaxed = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .ok()?;
        relaxed
            .captures(content)
            .map(|captures| captures[1].trim().to_string())
    }
}

pub(crate) fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub(crate) fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl Adapter for XmlAdapter {
    fn name(&self) -> &'static str {
        "xml"
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
            chat.push(Message::user(self.render_fields(signature, demo, true)));
            chat.push(Message::assistant(self.render_fields(signature, demo, false)));
        }
        chat.push(Message::user(self.render_fields(signature, inputs, true)));

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
            if let Some(text) = self.extract_tag(content, &field.name) {
                outputs.insert(
                    field.name.clone(),
                    coerce_value(field, &unescape_xml(&text)),
                );
            }
        }

        if outputs.is_empty() {
            return Ok(whole_reply_fallback(signature, content));
        }
        Ok(outputs)
    }
}
