use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use super::{Cache, CacheEntry};

/// Process-local cache: a locked map with lazy expiry on read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        {
            let entries = self.entries.read().expect("cache lock poisoned");
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it so the map does not accumulate dead entries.
        self.entries
            .write()
            .expect("cache lock poisoned")
            .remove(key);
        None
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries
            .write()
            .expect("cache lock poisoned")
            .insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    async fn delete(&self, key: &str) {
        self.entries
            .write()
            .expect("cache lock poisoned")
            .remove(key);
    }

    async fn clear(&self) {
        self.entries.write().expect("cache lock poisoned").clear();
    }

    async fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }
}
