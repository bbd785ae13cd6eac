//! Shared content cache for fetched objects.
//!
//! One process-wide, cost-bounded cache holds fully-buffered object bodies,
//! shared by every storage backend. Cost equals byte length; least-recently
//! used entries are evicted to stay under the size bound, and admission may
//! be refused outright for entries that can never fit.
//!
//! The cache knows nothing about freshness. Each entry records when it was
//! fetched and the storage backend decides, per its own `max_age`, whether a
//! hit is still usable (deleting it if not).

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::CacheConfig;

/// One fully-buffered object body.
#[derive(Debug, Clone)]
pub struct CachedObject {
    /// Object name, as the backend keys it (leading `/` stripped).
    pub name: String,
    /// The buffered body.
    pub data: Bytes,
    /// Length the entry answers for `stat`; equals `data.len()` for every
    /// entry produced by a storage backend.
    pub declared_len: i64,
    /// Fetch time for age checks.
    pub fetched: Instant,
    /// Fetch time surfaced as the file's modification time.
    pub fetched_at: SystemTime,
}

impl CachedObject {
    pub fn new(name: impl Into<String>, data: Bytes) -> Self {
        let declared_len = data.len() as i64;
        Self {
            name: name.into(),
            data,
            declared_len,
            fetched: Instant::now(),
            fetched_at: SystemTime::now(),
        }
    }

    /// Cost charged to the cache.
    pub fn cost(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Cache counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refused: u64,
    pub entries: usize,
    pub size_bytes: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Process-wide object cache.
pub struct ObjectCache {
    cache: RwLock<LruCache<String, Arc<CachedObject>>>,
    max_size_bytes: u64,
    current_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    refused: AtomicU64,
}

impl ObjectCache {
    pub fn new(config: CacheConfig) -> Self {
        let max_entries = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(max_entries)),
            max_size_bytes: config.max_size_bytes,
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refused: AtomicU64::new(0),
        }
    }

    /// Look up an entry. Freshness is the caller's concern.
    pub async fn get(&self, key: &str) -> Option<Arc<CachedObject>> {
        let mut cache = self.cache.write().await;
        match cache.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(entry))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert an entry, evicting as needed. Returns `false` when admission
    /// is refused; refusal is not fatal to the caller.
    pub async fn put(&self, key: String, entry: Arc<CachedObject>, cost: u64) -> bool {
        if cost > self.max_size_bytes {
            self.refused.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut cache = self.cache.write().await;

        // Replacing an existing entry releases its cost first; a later put
        // for the same key is last-writer-wins.
        if let Some(old) = cache.pop(&key) {
            self.current_size.fetch_sub(old.cost(), Ordering::Relaxed);
        }

        while self.current_size.load(Ordering::Relaxed) + cost > self.max_size_bytes {
            match cache.pop_lru() {
                Some((evicted_key, evicted)) => {
                    debug!(key = %evicted_key, cost = evicted.cost(), "evicted cache entry");
                    self.current_size
                        .fetch_sub(evicted.cost(), Ordering::Relaxed);
                }
                None => break,
            }
        }

        self.current_size.fetch_add(cost, Ordering::Relaxed);
        cache.put(key, entry);
        true
    }

    /// Remove an entry, e.g. after a freshness check failed.
    pub async fn delete(&self, key: &str) {
        let mut cache = self.cache.write().await;
        if let Some(entry) = cache.pop(key) {
            self.current_size.fetch_sub(entry.cost(), Ordering::Relaxed);
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            entries: cache.len(),
            size_bytes: self.current_size.load(Ordering::Relaxed),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }
}
