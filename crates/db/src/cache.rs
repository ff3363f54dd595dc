//! Shared key/value cache with per-entry TTL.
//!
//! Used for the scheme list, progress snapshots, idempotency markers,
//! rate-limit counters and the worker health snapshot. A miss is
//! `Ok(None)`; [`CacheError`] only signals that the cache itself is
//! unreachable, which callers log and otherwise ignore.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache value could not be (de)serialized: {0}")]
    Codec(#[from] serde_json::Error),
}

#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Store only if the key is absent. Returns `true` when this call set it.
    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> Result<bool, CacheError>;

    /// Increment an integer counter, creating it with `ttl` when absent.
    /// The TTL is not extended by later increments.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Read and decode a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn SharedCache,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and store a JSON value.
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn SharedCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, raw, ttl).await
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process [`SharedCache`].
///
/// Expiry uses `tokio::time::Instant`, so tests can drive TTLs with
/// `tokio::time::pause` / `advance`.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    offline: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with [`CacheError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, CacheEntry>, Instant) -> R,
    ) -> Result<R, CacheError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache offline".into()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".into()))?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(f(&mut entries, now))
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_entries(|entries, _| entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.with_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    expires_at: now + ttl,
                },
            );
        })
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> Result<bool, CacheError> {
        self.with_entries(|entries, now| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    expires_at: now + ttl,
                },
            );
            true
        })
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        self.with_entries(|entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| CacheEntry {
                value: "0".to_string(),
                expires_at: now + ttl,
            });
            let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
            entry.value = next.to_string();
            next
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.with_entries(|entries, _| {
            entries.remove(key);
        })
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.with_entries(|_, _| ())
    }
}
