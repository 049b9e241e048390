use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Token-bucket rate limiter.
///
/// A buffered channel of capacity `requests_per_minute` starts full; a
/// background task refills one token every `minute / requests_per_minute`.
/// [`RateLimiter::wait`] takes a token, blocking while the bucket is empty,
/// and is cancelled by dropping the wait future.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: Mutex<mpsc::Receiver<()>>,
    refill: JoinHandle<()>,
}

impl RateLimiter {
    /// `requests_per_minute == 0` disables limiting; callers keep `None`.
    pub fn new(requests_per_minute: u32) -> Option<Self> {
        if requests_per_minute == 0 {
            return None;
        }

        let capacity = requests_per_minute as usize;
        let (tx, rx) = mpsc::channel(capacity);
        for _ in 0..capacity {
            tx.try_send(()).expect("fresh bucket cannot be full");
        }

        let interval = Duration::from_secs(60) / requests_per_minute;
        let refill = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; the bucket is already full.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // A full bucket drops the token instead of blocking the ticker.
                if tx.try_send(()).is_err() && tx.is_closed() {
                    break;
                }
            }
        });

        Some(Self {
            tokens: Mutex::new(rx),
            refill,
        })
    }

    /// Takes one token, waiting for the next refill when the bucket is dry.
    pub async fn wait(&self) {
        let mut tokens = self.tokens.lock().await;
        let _ = tokens.recv().await;
    }

    /// Tokens immediately available without waiting.
    pub fn available(&self) -> usize {
        self.tokens
            .try_lock()
            .map(|tokens| tokens.len())
            .unwrap_or(0)
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.refill.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_rate_disables_limiting() {
        assert!(RateLimiter::new(0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_starts_full_and_refills() {
        let limiter = RateLimiter::new(60).expect("non-zero rate");
        assert_eq!(limiter.available(), 60);

        for _ in 0..60 {
            limiter.wait().await;
        }
        assert_eq!(limiter.available(), 0);

        // One token per second at 60/min.
        tokio::time::advance(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        limiter.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_capacity_waits_complete_per_window() {
        let limiter = RateLimiter::new(2).expect("non-zero rate");
        limiter.wait().await;
        limiter.wait().await;

        // Bucket dry: a third wait must block until the ~30s refill.
        let blocked = tokio::time::timeout(Duration::from_secs(1), limiter.wait()).await;
        assert!(blocked.is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        tokio::time::timeout(Duration::from_secs(1), limiter.wait())
            .await
            .expect("refilled token should be available");
    }
}
