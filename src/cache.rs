//! Bound-provider cache
//!
//! Binding a (profile, provider) pair fetches and resolves documents, so the
//! result is cached under a key derived from both configurations. Expiry is
//! absolute against an injectable clock, and at most one factory call per
//! key is in flight; late requesters await the winner's entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::PerformError;
use crate::time::Clock;

struct CacheEntry<V> {
    value: V,
    expires_at_millis: u64,
}

/// Keyed cache with absolute expiry and per-key factory locking.
pub struct ExpiringCache<V> {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn live_value(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(key).filter(|e| now < e.expires_at_millis).map(|e| e.value.clone())
    }

    /// Return the cached value, or build one with `factory`.
    ///
    /// Expired entries are replaced; a factory error is not cached.
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<V, PerformError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, PerformError>>,
    {
        if let Some(value) = self.live_value(key) {
            return Ok(value);
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        // Another requester may have built the entry while we waited.
        if let Some(value) = self.live_value(key) {
            return Ok(value);
        }

        let value = factory().await?;
        let expires_at_millis = self.clock.now_millis() + self.ttl.as_millis() as u64;
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), CacheEntry { value: value.clone(), expires_at_millis });
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|e| now < e.expires_at_millis)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
