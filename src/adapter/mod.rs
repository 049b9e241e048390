//! Signature↔prompt translation.
//!
//! An adapter owns both directions of the LM boundary: `format` renders a
//! signature, inputs, and demos into an [`LMRequest`], and `parse` turns
//! the reply back into named output values. Five variants share the
//! contract; they differ only in wire shape and recovery strategy.
//!
//! Failure policy: `format` reports signature misuse only — it never
//! refuses inputs. `parse` tries its recovery strategies in order and
//! falls back to binding the whole reply to the first output field rather
//! than panicking.

pub mod baml;
pub mod chat_adapter;
pub mod json;
pub mod two_step;
pub mod xml;

pub use baml::*;
pub use chat_adapter::*;
pub use json::*;
pub use two_step::*;
pub use xml::*;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::core::errors::{AdapterError, ParseError};
use crate::core::signature::{Field, FieldType, Signature};
use crate::data::Example;
use crate::lm::{LMRequest, LMResponse};

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable identifier, the value used in settings.
    fn name(&self) -> &'static str;

    fn format(
        &self,
        signature: &Signature,
        inputs: &Example,
        demos: &[Example],
    ) -> Result<LMRequest, AdapterError>;

    /// Async because the two-step variant runs an extraction LM call.
    async fn parse(
        &self,
        signature: &Signature,
        response: &LMResponse,
    ) -> Result<IndexMap<String, Value>, ParseError>;
}

/// The adapter selected through settings. TwoStep is excluded: it needs an
/// extraction LM and is constructed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterKind {
    #[default]
    Chat,
    Json,
    Baml,
    Xml,
}

impl AdapterKind {
    pub fn instantiate(&self) -> Arc<dyn Adapter> {
        match self {
            AdapterKind::Chat => Arc::new(ChatAdapter),
            AdapterKind::Json => Arc::new(JsonAdapter::default()),
            AdapterKind::Baml => Arc::new(BamlAdapter),
            AdapterKind::Xml => Arc::new(XmlAdapter::default()),
        }
    }
}

impl FromStr for AdapterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(AdapterKind::Chat),
            "json" => Ok(AdapterKind::Json),
            "baml" => Ok(AdapterKind::Baml),
            "xml" => Ok(AdapterKind::Xml),
            other => Err(other.to_string()),
        }
    }
}

/// Coerces extracted text into the field's declared type. Typed fields try
/// JSON first and keep the raw text when that fails; parse never hard-fails
/// on a coercion.
pub(crate) fn coerce_value(field: &Field, text: &str) -> Value {
    let trimmed = text.trim();
    if field.ty.is_text() {
        return Value::String(trimmed.to_string());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if matches_type(field.ty, &value) => value,
        _ => Value::String(trimmed.to_string()),
    }
}

fn matches_type(ty: FieldType, value: &Value) -> bool {
    match ty {
        FieldType::String => value.is_string(),
        FieldType::Int => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_number(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
    }
}

/// Value rendered for a prompt: strings verbatim, everything else JSON.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Last-resort parse result: the whole reply under the first output field.
pub(crate) fn whole_reply_fallback(
    signature: &Signature,
    content: &str,
) -> IndexMap<String, Value> {
    let mut outputs = IndexMap::new();
    if let Some(first) = signature.output_fields.keys().next() {
        outputs.insert(first.clone(), Value::String(content.trim().to_string()));
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_kind_from_str() {
        assert_eq!("chat".parse::<AdapterKind>().unwrap(), AdapterKind::Chat);
        assert_eq!("JSON".parse::<AdapterKind>().unwrap(), AdapterKind::Json);
        assert!("yaml".parse::<AdapterKind>().is_err());
    }

    #[test]
    fn coercion_respects_declared_type() {
        let int_field = Field::output("count").with_type(FieldType::Int);
        assert_eq!(coerce_value(&int_field, "42"), serde_json::json!(42));
        // Mismatched payloads stay textual rather than failing the parse.
        assert_eq!(
            coerce_value(&int_field, "forty-two"),
            serde_json::json!("forty-two")
        );

        let text_field = Field::output("answer");
        assert_eq!(coerce_value(&text_field, " 42 "), serde_json::json!("42"));
    }
}
