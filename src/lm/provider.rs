use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Mutex, RwLock};

use async_trait::async_trait;

use crate::core::errors::{ConfigError, LmError};

use super::request::{LMRequest, LMResponse};

/// A concrete completion backend. Vendor HTTP clients implement this
/// elsewhere; the core only routes to it.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &LMRequest) -> Result<LMResponse, LmError>;
}

/// Builds a provider for a given model name.
pub type ProviderFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn Provider>, ConfigError> + Send + Sync>;

static REGISTRY: LazyLock<RwLock<HashMap<String, ProviderFactory>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Installs a provider factory under `name`, replacing any previous one.
pub fn register_provider(name: impl Into<String>, factory: ProviderFactory) {
    REGISTRY
        .write()
        .expect("provider registry lock poisoned")
        .insert(name.into(), factory);
}

/// Instantiates a provider from the registry.
pub fn provider_for(name: &str, model: &str) -> Result<Arc<dyn Provider>, ConfigError> {
    let factory = REGISTRY
        .read()
        .expect("provider registry lock poisoned")
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownProvider {
            name: name.to_string(),
        })?;
    factory(model)
}

/// Splits a model identifier into `(provider, model)`.
///
/// `"openai/gpt-4o"` routes explicitly; bare names are inferred from the
/// model family prefix, defaulting to openai.
pub fn route_model(identifier: &str) -> (&str, &str) {
    if let Some((provider, model)) = identifier.split_once('/') {
        return (provider, model);
    }
    // gpt-/o1/o3 models and everything unrecognized route to openai.
    let provider = if identifier.starts_with("claude-") {
        "anthropic"
    } else {
        "openai"
    };
    (provider, identifier)
}

/// In-process provider serving canned responses, used by tests and examples.
///
/// Responses are consumed front to back; an empty queue repeats the last
/// response handed out, so a single canned reply can serve a whole run.
#[derive(Default)]
pub struct StaticProvider {
    responses: Mutex<VecDeque<LMResponse>>,
    last: Mutex<Option<LMResponse>>,
    requests: Mutex<Vec<LMRequest>>,
    /// Errors to yield before the canned responses, for retry tests.
    failures: Mutex<VecDeque<LmError>>,
}

impl StaticProvider {
    pub fn new(responses: impl IntoIterator<Item = LMResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Canned provider that always answers `content`.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new([LMResponse::assistant("static", content)])
    }

    pub fn push_response(&self, response: LMResponse) {
        self.responses
            .lock()
            .expect("static provider lock poisoned")
            .push_back(response);
    }

    pub fn push_failure(&self, error: LmError) {
        self.failures
            .lock()
            .expect("static provider lock poisoned")
            .push_back(error);
    }

    /// Requests observed so far, oldest first.
    pub fn requests(&self) -> Vec<LMRequest> {
        self.requests
            .lock()
            .expect("static provider lock poisoned")
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .expect("static provider lock poisoned")
            .len()
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn complete(&self, request: &LMRequest) -> Result<LMResponse, LmError> {
        self.requests
            .lock()
            .expect("static provider lock poisoned")
            .push(request.clone());

        if let Some(error) = self
            .failures
            .lock()
            .expect("static provider lock poisoned")
            .pop_front()
        {
            return Err(error);
        }

        let next = self
            .responses
            .lock()
            .expect("static provider lock poisoned")
            .pop_front();
        let mut last = self.last.lock().expect("static provider lock poisoned");
        match next {
            Some(response) => {
                *last = Some(response.clone());
                Ok(response)
            }
            None => last.clone().ok_or_else(|| LmError::Provider {
                provider: "static".to_string(),
                message: "response queue is empty".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("openai/gpt-4o", "openai", "gpt-4o")]
    #[case("anthropic/claude-3-haiku", "anthropic", "claude-3-haiku")]
    #[case("gpt-4o-mini", "openai", "gpt-4o-mini")]
    #[case("o1-preview", "openai", "o1-preview")]
    #[case("o3-mini", "openai", "o3-mini")]
    #[case("claude-sonnet-4", "anthropic", "claude-sonnet-4")]
    #[case("mistral-large", "openai", "mistral-large")]
    fn model_routing(#[case] id: &str, #[case] provider: &str, #[case] model: &str) {
        assert_eq!(route_model(id), (provider, model));
    }

    #[tokio::test]
    async fn static_provider_repeats_last_response() {
        let provider = StaticProvider::text("42");
        let request = LMRequest::from_prompt("q");
        assert_eq!(provider.complete(&request).await.unwrap().content(), "42");
        assert_eq!(provider.complete(&request).await.unwrap().content(), "42");
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test]
    async fn static_provider_yields_failures_first() {
        let provider = StaticProvider::text("ok");
        provider.push_failure(LmError::RateLimited { retry_after: None });
        let request = LMRequest::from_prompt("q");
        assert!(provider.complete(&request).await.is_err());
        assert_eq!(provider.complete(&request).await.unwrap().content(), "ok");
    }

    #[tokio::test]
    async fn registry_round_trip() {
        register_provider(
            "unit-test-echo",
            Arc::new(|_model| {
                Ok(Arc::new(StaticProvider::text("echo")) as Arc<dyn Provider>)
            }),
        );
        let provider = provider_for("unit-test-echo", "any-model").unwrap();
        assert_eq!(provider.name(), "static");
        assert!(matches!(
            provider_for("unregistered", "m"),
            Err(ConfigError::UnknownProvider { .. })
        ));
    }
}
