//! Keyed TTL cache
//!
//! A small in-process cache mapping a key to `{value, expires_at}`.
//! Lookups that miss go through a per-key fetch lock, so at most one fetch
//! per key runs at a time and callers that queued behind it reuse its
//! result. Failed fetches (`None`) are not stored.

mod clock;

pub use clock::{bank_reference, local_date, Clock, ManualClock, SystemClock};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// TTL cache with single-flight refresh
pub struct TtlCache<V> {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    fetch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get a live value
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    /// Store a value for `ttl`
    pub async fn insert(&self, key: &str, value: V, ttl: Duration) {
        let expires_at = self.clock.now()
            + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    /// Return the cached value or run `fetch` once and cache a `Some` result.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        if let Some(value) = self.get(key).await {
            return Some(value);
        }

        let lock = {
            let mut locks = self.fetch_locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Someone ahead of us may have filled it
        if let Some(value) = self.get(key).await {
            return Some(value);
        }

        let value = fetch().await?;
        self.insert(key, value.clone(), ttl).await;
        Some(value)
    }
}
