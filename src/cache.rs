//! Time-bounded response cache.
//!
//! [`ResponseCache`] works against any [`KeyValueStore`]. [`MemoryStore`] is the
//! in-process implementation: unbounded, with entries dropped only when they
//! are observed expired or cleared by prefix. Payloads are expected to be small.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::{decode::Payload, Result};

/// Key-value capability the cache needs from a storage backend.
///
/// Implementations must be safe to share between concurrent requests. A race
/// between two writers of the same key resolves last-write-wins.
pub trait KeyValueStore: Send + Sync {
    /// Returns the live value for `key`. Expired entries read as absent.
    fn get(&self, key: &str) -> Option<Payload>;

    /// Stores `value`; `ttl = None` keeps it until removed.
    fn set(&self, key: &str, value: Payload, ttl: Option<Duration>);

    fn remove(&self, key: &str);

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Payload,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// In-memory [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until observed.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Payload> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Re-check under the write lock: another caller may have refreshed it.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            #[cfg(feature = "tracing")]
            tracing::debug!(key, "cache entry expired");
        }
        None
    }

    fn set(&self, key: &str, value: Payload, ttl: Option<Duration>) {
        // A TTL past the clock's range means no expiry.
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries
            .write()
            .insert(key.to_owned(), CacheEntry { value, expires_at });
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Read-through cache over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache").finish_non_exhaustive()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches its
    /// result for `ttl`. Failed fetches are never cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Payload>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Payload>>,
    {
        if let Some(hit) = self.store.get(key) {
            #[cfg(feature = "tracing")]
            tracing::debug!(key, "cache hit");
            return Ok(hit);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(key, "cache miss");

        let value = fetch().await?;
        self.store.set(key, value.clone(), Some(ttl));
        Ok(value)
    }

    /// Removes every key starting with `prefix`, or every key when `None`.
    pub fn clear(&self, prefix: Option<&str>) {
        for key in self.store.keys_with_prefix(prefix.unwrap_or_default()) {
            self.store.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;

    use serde_json::json;

    use super::{KeyValueStore, MemoryStore, ResponseCache};
    use crate::{decode::Payload, ApiError};

    fn payload(n: i64) -> Payload {
        Payload::Json(json!({ "n": n }))
    }

    #[tokio::test(start_paused = true)]
    async fn entry_lives_until_ttl_then_is_removed() {
        let store = MemoryStore::new();
        store.set("k", payload(1), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get("k"), Some(payload(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_without_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("k", payload(1), None);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(store.get("k"), Some(payload(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_ttl_does_not_expire() {
        let store = MemoryStore::new();
        store.set("k", payload(1), Some(Duration::MAX));
        tokio::time::advance(Duration::from_secs(365 * 86_400)).await;
        assert_eq!(store.get("k"), Some(payload(1)));
    }

    #[test]
    fn keys_with_prefix_filters() {
        let store = MemoryStore::new();
        store.set("/prices?crop=wheat", payload(1), None);
        store.set("/prices?crop=rice", payload(2), None);
        store.set("/weather", payload(3), None);

        let mut keys = store.keys_with_prefix("/prices");
        keys.sort();
        assert_eq!(keys, vec!["/prices?crop=rice", "/prices?crop=wheat"]);
    }

    #[tokio::test(start_paused = true)]
    async fn get_or_fetch_hits_within_ttl() {
        let cache = ResponseCache::default();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(payload(7))
        };

        let ttl = Duration::from_millis(1_800_000);
        assert_eq!(cache.get_or_fetch("k", ttl, fetch).await.unwrap(), payload(7));
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(cache.get_or_fetch("k", ttl, fetch).await.unwrap(), payload(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(ttl).await;
        cache.get_or_fetch("k", ttl, fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store.clone());

        let err = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                Err(ApiError::Server {
                    status: 500,
                    body: String::new(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Server { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn clear_by_prefix_and_all() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store.clone());
        store.set("/prices?crop=wheat", payload(1), None);
        store.set("/weather", payload(2), None);

        cache.clear(Some("/prices"));
        assert_eq!(store.len(), 1);
        assert!(store.get("/weather").is_some());

        cache.clear(None);
        assert!(store.is_empty());
    }
}
