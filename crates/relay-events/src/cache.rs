//! Result cache: keeps the outcome of every processed event for a bounded
//! TTL, keyed by event id.
//!
//! This mirrors the shape of `relay-store::cache::CacheLayer` (moka-backed,
//! builder-constructed, hit/miss counters) but is kept local to this crate
//! rather than shared, since its value type and insert path are specific to
//! events and the two crates are otherwise independent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::model::CachedEventResult;

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// TTL-backed cache of [`CachedEventResult`]s, keyed by event id.
#[derive(Clone)]
pub struct ResultCache {
    inner: Cache<String, CachedEventResult>,
    stats: Arc<CacheStats>,
}

impl ResultCache {
    /// `ttl_seconds` defaults to one hour per the router's result cache spec.
    pub fn new(max_capacity: u64, ttl_seconds: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(Duration::from_secs(ttl_seconds))
                .build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub async fn insert(&self, result: CachedEventResult) {
        debug!(event_id = %result.event_id, kind = %result.kind, success = result.success, "caching event result");
        self.inner.insert(result.event_id.clone(), result).await;
    }

    pub async fn get(&self, event_id: &str) -> Option<CachedEventResult> {
        match self.inner.get(event_id).await {
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn hits(&self) -> u64 {
        self.stats.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.stats.misses.load(Ordering::Relaxed)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(10_000, 3600)
    }
}
