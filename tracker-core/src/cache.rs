//! Time-bounded in-memory caches.
//!
//! Every component receives its cache as an `Arc<dyn CacheStore<V>>`, so
//! tests can hand in a fresh instance (or a zero-TTL one) per case.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

pub const POST_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub const COMMENT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub const DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const MULTI_SCAN_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub const BREAKDOWN_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub stored_at: Instant,
    pub value: V,
}

#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the entry for `key` only while it is younger than the TTL.
    async fn get(&self, key: &str) -> Option<CacheEntry<V>>;

    async fn put(&self, key: String, value: V);

    async fn clear(&self);
}

#[derive(Debug)]
pub struct TtlCache<V> {
    name: &'static str,
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn shared(name: &'static str, ttl: Duration) -> Arc<dyn CacheStore<V>> {
        Arc::new(Self::new(name, ttl))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<V> CacheStore<V> for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    debug!("{} cache hit: {}", self.name, key);
                    return Some(entry.clone());
                }
                Some(_) => {}
                None => {
                    debug!("{} cache miss: {}", self.name, key);
                    return None;
                }
            }
        }

        // Expired: evict under the write lock, re-checking in case a fresh
        // value was stored in between.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.stored_at.elapsed() < self.ttl {
                return Some(entry.clone());
            }
        }
        entries.remove(key);
        debug!("{} cache entry expired: {}", self.name, key);
        None
    }

    async fn put(&self, key: String, value: V) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Canonical compact JSON encoding of a composite cache key. Field order is
/// the declaration order of the serialized struct, so callers keep it fixed.
pub fn composite_key<T: Serialize>(key: &T) -> String {
    serde_json::to_string(key).unwrap_or_default()
}
