use serde::{Deserialize, Serialize};

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl LmUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &LmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Running totals across every call an [`LM`](super::LM) has made.
///
/// Updated under the LM's write boundary; [`UsageTracker::snapshot`] hands
/// readers an independent copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTracker {
    pub requests: u64,
    pub cache_hits: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Rough cost estimate in USD, from the configured per-token rates.
    pub cost: f64,
}

impl UsageTracker {
    pub fn record(&mut self, usage: &LmUsage, cost_per_mtok_in: f64, cost_per_mtok_out: f64) {
        self.requests += 1;
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
        self.cost += f64::from(usage.prompt_tokens) * cost_per_mtok_in / 1_000_000.0
            + f64::from(usage.completion_tokens) * cost_per_mtok_out / 1_000_000.0;
    }

    pub fn snapshot(&self) -> UsageTracker {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates() {
        let mut tracker = UsageTracker::default();
        tracker.record(&LmUsage::new(100, 50), 1.0, 2.0);
        tracker.record(&LmUsage::new(10, 5), 1.0, 2.0);

        assert_eq!(tracker.requests, 2);
        assert_eq!(tracker.prompt_tokens, 110);
        assert_eq!(tracker.completion_tokens, 55);
        assert_eq!(tracker.total_tokens, 165);
        assert!(tracker.cost > 0.0);
    }
}
