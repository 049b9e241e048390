use std::time::Duration;

use bon::Builder;

/// Exponential backoff for retryable LM failures.
///
/// Wait for attempt `i` (0-based) is `initial_wait * multiplier^i`, capped
/// at `max_wait`. Sleeps are plain awaits, so dropping the call future
/// preempts the backoff.
#[derive(Debug, Clone, Builder)]
pub struct RetryPolicy {
    #[builder(default = Duration::from_secs(1))]
    pub initial_wait: Duration,
    #[builder(default = 2.0)]
    pub multiplier: f64,
    #[builder(default = Duration::from_secs(30))]
    pub max_wait: Duration,
    #[builder(default = 3)]
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::builder().build()
    }
}

impl RetryPolicy {
    /// Backoff before retry attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let wait = self.initial_wait.mul_f64(factor.max(0.0));
        wait.min(self.max_wait)
    }

    /// No retries at all.
    pub fn none() -> Self {
        RetryPolicy::builder().max_retries(0).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn custom_policy() {
        let policy = RetryPolicy::builder()
            .initial_wait(Duration::from_millis(100))
            .multiplier(3.0)
            .max_wait(Duration::from_millis(500))
            .max_retries(5)
            .build();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(300));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
    }
}
