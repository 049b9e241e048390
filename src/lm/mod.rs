//! The LM client layer: provider routing, caching, rate limiting, retries,
//! usage accounting, and SSE streaming helpers.

pub mod chat;
pub mod config;
pub mod provider;
pub mod rate_limit;
pub mod request;
pub mod retry;
pub mod streaming;
pub mod usage;

pub use chat::*;
pub use config::*;
pub use provider::*;
pub use rate_limit::*;
pub use request::*;
pub use retry::*;
pub use streaming::*;
pub use usage::*;

use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::cache::{Cache, request_cache_key};
use crate::core::errors::{ConfigError, LmError};

/// A provider-routed LM client.
///
/// One `LM` owns a provider handle, an optional response cache, an optional
/// token-bucket rate limiter, a retry policy, and a usage tracker. Cloning
/// is cheap and shares all of those, so a program can hand the same client
/// to every module.
pub struct LM {
    pub config: LMConfig,
    model: String,
    provider: Arc<dyn Provider>,
    cache: Option<Arc<dyn Cache>>,
    limiter: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
    usage: Arc<Mutex<UsageTracker>>,
}

impl Clone for LM {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            model: self.model.clone(),
            provider: Arc::clone(&self.provider),
            cache: self.cache.clone(),
            limiter: self.limiter.clone(),
            retry: self.retry.clone(),
            usage: Arc::clone(&self.usage),
        }
    }
}

impl LM {
    /// Builds a client by routing `config.model` through the process-wide
    /// provider registry.
    pub fn new(config: LMConfig) -> Result<Self, ConfigError> {
        let (provider_name, model) = route_model(&config.model);
        let provider = provider_for(provider_name, model)?;
        let model = model.to_string();
        Ok(Self::assemble(config, model, provider))
    }

    /// Builds a client around an explicit provider, bypassing the registry.
    /// This is how tests and embedded backends plug in.
    pub fn with_provider(config: LMConfig, provider: Arc<dyn Provider>) -> Self {
        let (_, model) = route_model(&config.model);
        let model = model.to_string();
        Self::assemble(config, model, provider)
    }

    fn assemble(config: LMConfig, model: String, provider: Arc<dyn Provider>) -> Self {
        let limiter = RateLimiter::new(config.requests_per_minute).map(Arc::new);
        Self {
            config,
            model,
            provider,
            cache: None,
            limiter,
            retry: RetryPolicy::default(),
            usage: Arc::new(Mutex::new(UsageTracker::default())),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The resolved model identifier, without the provider prefix.
    pub fn name(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Snapshot of accumulated usage.
    pub fn usage(&self) -> UsageTracker {
        self.usage.lock().expect("usage lock poisoned").snapshot()
    }

    /// Fills unset sampling knobs from the client's own config.
    fn effective_request(&self, mut request: LMRequest) -> LMRequest {
        if request.temperature == 0.0 {
            request.temperature = self.config.temperature;
        }
        if request.max_tokens == 0 {
            request.max_tokens = self.config.max_tokens;
        }
        if request.top_p.is_none() {
            request.top_p = self.config.top_p;
        }
        if request.stop.is_empty() {
            request.stop = self.config.stop.clone();
        }
        request
    }

    /// Executes one completion: cache lookup, rate-limit wait, provider
    /// dispatch under the configured timeout, retrying retryable failures
    /// with exponential backoff.
    #[tracing::instrument(name = "teleprompt.lm.call", level = "debug", skip(self, request), fields(model = %self.model))]
    pub async fn call(&self, request: LMRequest) -> Result<LMResponse, LmError> {
        let request = self.effective_request(request);
        let cache_key = if self.config.cache {
            self.cache
                .as_ref()
                .map(|_| request_cache_key(&self.model, &request))
        } else {
            None
        };

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_ref())
            && let Some(bytes) = cache.get(key).await
        {
            match serde_json::from_slice::<LMResponse>(&bytes) {
                Ok(response) => {
                    self.usage.lock().expect("usage lock poisoned").cache_hits += 1;
                    trace!(key = %key, "cache hit");
                    return Ok(response);
                }
                Err(err) => {
                    debug!(error = %err, "cached response undecodable, refetching");
                    cache.delete(key).await;
                }
            }
        }

        if let Some(limiter) = self.limiter.as_ref() {
            limiter.wait().await;
        }

        let response = self.dispatch_with_retry(&request).await?;

        self.usage.lock().expect("usage lock poisoned").record(
            &response.usage,
            self.config.cost_per_mtok_in,
            self.config.cost_per_mtok_out,
        );
        debug!(
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "lm response received"
        );

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_ref())
            && let Ok(bytes) = serde_json::to_vec(&response)
        {
            cache.set(key, bytes, self.config.cache_ttl).await;
        }

        Ok(response)
    }

    /// Runs every request, preserving input order. Each call individually
    /// consults cache and limiter.
    pub async fn call_batch(
        &self,
        requests: Vec<LMRequest>,
    ) -> Vec<Result<LMResponse, LmError>> {
        let calls = requests.into_iter().map(|request| self.call(request));
        futures::future::join_all(calls).await
    }

    async fn dispatch_with_retry(&self, request: &LMRequest) -> Result<LMResponse, LmError> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(
                self.config.timeout,
                self.provider.complete(request),
            )
            .await
            .unwrap_or(Err(LmError::Timeout {
                after: self.config.timeout,
            }));

            match outcome {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let wait = self.retry.backoff(attempt);
                    debug!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying lm call");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
