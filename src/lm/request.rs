use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chat::{Chat, Message};
use super::usage::LmUsage;

/// Provider-neutral completion request: the LM client boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LMRequest {
    #[serde(default)]
    pub messages: Chat,
    /// Plain completion prompt; mutually exclusive with `messages` in
    /// practice, but the client forwards whichever is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default)]
    pub stream: bool,
    /// Free-form provider knobs, e.g. `{"response_format": {"type": "json_object"}}`.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

fn default_n() -> u32 {
    1
}

impl LMRequest {
    pub fn from_chat(messages: Chat) -> Self {
        Self {
            messages,
            n: 1,
            ..Default::default()
        }
    }

    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            n: 1,
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// One completion choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Provider-neutral completion response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LMResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: LmUsage,
}

impl LMResponse {
    /// Builds a single-choice assistant response; the conventional shape for
    /// tests and canned providers.
    pub fn assistant(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.into(),
            choices: vec![Choice {
                message: Message::assistant(content),
                finish_reason: Some("stop".to_string()),
            }],
            usage: LmUsage::default(),
        }
    }

    /// Content of the first choice, or empty when the provider returned none.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|choice| choice.message.content())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_response_shape() {
        let response = LMResponse::assistant("test-model", "hello");
        assert_eq!(response.content(), "hello");
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(!response.id.is_empty());
    }

    #[test]
    fn request_serde_round_trip() {
        let request = LMRequest::from_prompt("complete me")
            .with_extra("response_format", serde_json::json!({"type": "json_object"}));
        let decoded: LMRequest =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }
}
