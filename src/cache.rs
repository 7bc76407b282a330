//! TTL caches protecting the API server and the metrics backend.
//!
//! Two instances exist per process: the workload cache (key
//! `{policy.namespace}/{policy.name}`, value: discovered workload list) and
//! the metrics cache (key `{namespace}/{pod}/{container}`, value: container
//! statistics). Both share one design: a string-keyed map of
//! `(value, inserted-at)` behind a reader-writer lock. An entry is fresh iff
//! `now - inserted <= ttl`. Concurrent misses for the same key may each call
//! the upstream; there is no single-flight deduplication.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A TTL cache from string keys to cloneable values.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, (V, Instant)>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any. Stale entries read as misses; they are
    /// dropped lazily on the next `set` or `invalidate`.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        entries.get(key).and_then(|(value, inserted)| {
            if inserted.elapsed() <= self.ttl {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    /// Unconditional insert.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.write().insert(key.into(), (value, Instant::now()));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    /// Number of entries, fresh or stale.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cache-through read: on a miss, call `upstream` and insert its result.
    pub async fn get_or_fetch<E, F, Fut>(&self, key: &str, upstream: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = upstream().await?;
        self.set(key, value.clone());
        Ok(value)
    }
}

/// Metrics cache key: `{namespace}/{pod}/{container}`.
pub fn metrics_cache_key(namespace: &str, pod: &str, container: &str) -> String {
    format!("{namespace}/{pod}/{container}")
}
