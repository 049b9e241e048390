//! Response caching.
//!
//! The LM client treats the cache as an external K→V store with per-entry
//! TTL: any implementation of [`Cache`] will do. Two are provided — an
//! in-memory map and a persistent on-disk store with background garbage
//! collection and size-based eviction.

pub mod disk;
pub mod memory;

pub use disk::*;
pub use memory::*;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::lm::LMRequest;

/// TTL applied when a caller passes zero.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A key→bytes store with per-entry expiry. Entries may be evicted at any
/// time; callers never hold references into cache storage.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key`. A zero `ttl` means [`DEFAULT_TTL`].
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    async fn delete(&self, key: &str);

    async fn clear(&self);

    async fn len(&self) -> usize;
}

/// One stored value with its expiry instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub expires_at: DateTime<Utc>,
    pub value: Vec<u8>,
}

impl CacheEntry {
    pub fn new(value: Vec<u8>, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
        Self {
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24)),
            value,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Cache key for a completion request: SHA-256 over the canonicalized
/// fields that determine the response.
pub fn request_cache_key(model: &str, request: &LMRequest) -> String {
    let canonical = serde_json::json!({
        "model": model,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "messages": request.messages.to_json(),
        "prompt": request.prompt,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut key = String::with_capacity(64);
    for byte in digest {
        key.push_str(&format!("{byte:02x}"));
    }
    key
}

#[cfg(test)]
mod tests {
    use crate::lm::{Chat, Message};

    use super::*;

    #[test]
    fn cache_key_is_stable_and_sensitive() {
        let mut request = LMRequest::from_chat(Chat::new(vec![Message::user("q")]));
        request.temperature = 0.7;
        let key_a = request_cache_key("m", &request);
        let key_b = request_cache_key("m", &request);
        assert_eq!(key_a, key_b);
        assert_eq!(key_a.len(), 64);

        request.temperature = 0.8;
        assert_ne!(request_cache_key("m", &request), key_a);
        assert_ne!(request_cache_key("other", &request), key_a);
    }

    #[test]
    fn zero_ttl_gets_default() {
        let entry = CacheEntry::new(vec![1], Duration::ZERO);
        assert!(entry.expires_at > Utc::now() + chrono::Duration::hours(23));
        assert!(!entry.is_expired());
    }
}
