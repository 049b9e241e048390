use std::time::Duration;

use bon::Builder;

/// Tunable inference parameters applied to each [`LM::call`](super::LM::call).
#[derive(Debug, Clone, Builder)]
pub struct LMConfig {
    #[builder(default = "openai/gpt-4o-mini".to_string())]
    pub model: String,
    /// Sampling temperature. Higher values increase randomness.
    #[builder(default = 0.7)]
    pub temperature: f32,
    #[builder(default = 512)]
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    #[builder(default)]
    pub stop: Vec<String>,
    /// Whether responses are cached at all for this client.
    #[builder(default = true)]
    pub cache: bool,
    /// TTL applied to cached responses.
    #[builder(default = Duration::from_secs(60 * 60))]
    pub cache_ttl: Duration,
    /// Requests per minute; zero disables rate limiting.
    #[builder(default = 0)]
    pub requests_per_minute: u32,
    /// Deadline for one provider round trip.
    #[builder(default = Duration::from_secs(30))]
    pub timeout: Duration,
    /// USD per million prompt tokens, for the usage tracker's estimate.
    #[builder(default = 0.0)]
    pub cost_per_mtok_in: f64,
    /// USD per million completion tokens.
    #[builder(default = 0.0)]
    pub cost_per_mtok_out: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        LMConfig::builder().build()
    }
}
