use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Cache, CacheEntry};

/// How often the background garbage collector sweeps expired entries.
const GC_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Share of entries dropped when the store outgrows `max_size`.
const EVICTION_FRACTION: f64 = 0.25;

#[derive(Debug, Clone)]
struct EntryMeta {
    expires_at: DateTime<Utc>,
    size: u64,
}

/// On-disk representation: one JSON file per entry. The original key is
/// stored inside because filenames are hashes.
#[derive(Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    expires_at: DateTime<Utc>,
    value: String,
}

#[derive(Debug)]
struct DiskInner {
    dir: PathBuf,
    max_size: u64,
    index: RwLock<HashMap<String, EntryMeta>>,
}

/// Persistent cache: one file per entry under a cache directory, an
/// in-memory index for expiry bookkeeping, a background GC pass every ten
/// minutes, and size-based eviction of the soonest-to-expire quarter.
#[derive(Debug)]
pub struct DiskCache {
    inner: Arc<DiskInner>,
    gc: JoinHandle<()>,
}

impl DiskCache {
    /// Opens (and if necessary creates) the cache directory, rebuilding the
    /// index from the entries already on disk. `max_size == 0` disables
    /// size-based eviction.
    pub async fn open(dir: impl AsRef<Path>, max_size: u64) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = HashMap::new();
        let mut listing = tokio::fs::read_dir(&dir).await?;
        while let Some(file) = listing.next_entry().await? {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_entry(&path).await {
                Ok(entry) => {
                    let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
                    index.insert(
                        entry.key,
                        EntryMeta {
                            expires_at: entry.expires_at,
                            size,
                        },
                    );
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "dropping unreadable cache file");
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
        debug!(dir = %dir.display(), entries = index.len(), "disk cache opened");

        let inner = Arc::new(DiskInner {
            dir,
            max_size,
            index: RwLock::new(index),
        });

        let gc_inner = Arc::clone(&inner);
        let gc = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep_expired(&gc_inner).await;
            }
        });

        Ok(Self { inner, gc })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        entry_path(&self.inner.dir, key)
    }

    /// Total size in bytes of everything currently indexed.
    pub fn total_size(&self) -> u64 {
        self.inner
            .index
            .read()
            .expect("cache index lock poisoned")
            .values()
            .map(|meta| meta.size)
            .sum()
    }

    async fn evict_if_needed(&self) {
        if self.inner.max_size == 0 || self.total_size() <= self.inner.max_size {
            return;
        }

        // Evict the quarter of entries closest to expiring.
        let mut by_expiry: Vec<(String, DateTime<Utc>)> = {
            let index = self.inner.index.read().expect("cache index lock poisoned");
            index
                .iter()
                .map(|(key, meta)| (key.clone(), meta.expires_at))
                .collect()
        };
        by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

        let victim_count = ((by_expiry.len() as f64 * EVICTION_FRACTION).ceil() as usize).max(1);
        debug!(victims = victim_count, "disk cache over budget, evicting");
        for (key, _) in by_expiry.into_iter().take(victim_count) {
            self.remove_entry(&key).await;
        }
    }

    async fn remove_entry(&self, key: &str) {
        self.inner
            .index
            .write()
            .expect("cache index lock poisoned")
            .remove(key);
        let _ = tokio::fs::remove_file(self.path_for(key)).await;
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        self.gc.abort();
    }
}

fn entry_path(dir: &Path, key: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut stem = String::with_capacity(64);
    for byte in digest {
        stem.push_str(&format!("{byte:02x}"));
    }
    dir.join(format!("{stem}.json"))
}

async fn read_entry(path: &Path) -> anyhow::Result<CacheRead> {
    let raw = tokio::fs::read(path).await?;
    let entry: DiskEntry = serde_json::from_slice(&raw)?;
    let value = BASE64.decode(entry.value.as_bytes())?;
    Ok(CacheRead {
        key: entry.key,
        expires_at: entry.expires_at,
        value,
    })
}

struct CacheRead {
    key: String,
    expires_at: DateTime<Utc>,
    value: Vec<u8>,
}

async fn sweep_expired(inner: &DiskInner) {
    let expired: Vec<String> = {
        let index = inner.index.read().expect("cache index lock poisoned");
        index
            .iter()
            .filter(|(_, meta)| meta.expires_at <= Utc::now())
            .map(|(key, _)| key.clone())
            .collect()
    };
    if expired.is_empty() {
        return;
    }
    debug!(expired = expired.len(), "disk cache gc sweep");
    for key in expired {
        inner
            .index
            .write()
            .expect("cache index lock poisoned")
            .remove(&key);
        let _ = tokio::fs::remove_file(entry_path(&inner.dir, &key)).await;
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let expired = {
            let index = self.inner.index.read().expect("cache index lock poisoned");
            match index.get(key) {
                Some(meta) => meta.expires_at <= Utc::now(),
                None => return None,
            }
        };
        if expired {
            self.remove_entry(key).await;
            return None;
        }
        match read_entry(&self.path_for(key)).await {
            Ok(entry) => Some(entry.value),
            Err(err) => {
                warn!(error = %err, "cache file unreadable, dropping entry");
                self.remove_entry(key).await;
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl);
        let disk_entry = DiskEntry {
            key: key.to_string(),
            expires_at: entry.expires_at,
            value: BASE64.encode(&entry.value),
        };
        let encoded = match serde_json::to_vec(&disk_entry) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "could not encode cache entry");
                return;
            }
        };
        if let Err(err) = tokio::fs::write(self.path_for(key), &encoded).await {
            warn!(error = %err, "could not persist cache entry");
            return;
        }
        self.inner
            .index
            .write()
            .expect("cache index lock poisoned")
            .insert(
                key.to_string(),
                EntryMeta {
                    expires_at: entry.expires_at,
                    size: encoded.len() as u64,
                },
            );
        self.evict_if_needed().await;
    }

    async fn delete(&self, key: &str) {
        self.remove_entry(key).await;
    }

    async fn clear(&self) {
        let keys: Vec<String> = {
            let index = self.inner.index.read().expect("cache index lock poisoned");
            index.keys().cloned().collect()
        };
        for key in keys {
            self.remove_entry(&key).await;
        }
    }

    async fn len(&self) -> usize {
        self.inner
            .index
            .read()
            .expect("cache index lock poisoned")
            .len()
    }
}
