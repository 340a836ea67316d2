//! Two-tier cache: a fast in-memory L1 over a durable L2.
//!
//! Reads fall through L1 to L2 and promote L2 hits into L1. Writes go to L1
//! synchronously and to L2 best-effort: an L2 failure is logged and
//! swallowed, since L1 stays authoritative for the life of the process.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stowage_core::{CacheConfig, CacheError, CacheKey, StowageResult};
use tracing::{debug, warn};

use crate::durable::{decode_entry, encode_entry, DurableStore};
use crate::flight::SingleFlight;
use crate::memory::MemoryCache;
use crate::stats::CacheStats;

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default)]
struct TierCounters {
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_stale: AtomicU64,
    l2_read_failures: AtomicU64,
    l2_write_failures: AtomicU64,
    promotions: AtomicU64,
}

impl TierCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of two-tier cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoTierStats {
    /// Statistics of the L1 cache.
    pub l1: CacheStats,
    pub l2_hits: u64,
    pub l2_misses: u64,
    /// L2 entries found but older than the configured ttl.
    pub l2_stale: u64,
    /// L2 reads that failed or returned undecodable bytes.
    pub l2_read_failures: u64,
    /// L2 writes and deletes that failed and were swallowed.
    pub l2_write_failures: u64,
    pub promotions: u64,
}

// ============================================================================
// TWO-TIER CACHE
// ============================================================================

/// L1 [`MemoryCache`] composed with a [`DurableStore`] L2.
///
/// Values cross into L2 as JSON through the entry codec, so `V` must be
/// serializable. Cloning yields a handle to the same tiers.
///
/// # Example
///
/// ```ignore
/// let l2 = LmdbDurableStore::open(dir, 64)?;
/// let cache: TwoTierCache<Quote, _> = TwoTierCache::new(CacheConfig::default(), l2);
///
/// let quote = cache
///     .get_or_set("quote:BTC", || async { prices.fetch("BTC").await })
///     .await?;
/// ```
pub struct TwoTierCache<V, S> {
    l1: MemoryCache<V>,
    l2: Arc<S>,
    flights: Arc<SingleFlight>,
    counters: Arc<TierCounters>,
}

impl<V, S> Clone for TwoTierCache<V, S> {
    fn clone(&self) -> Self {
        Self {
            l1: self.l1.clone(),
            l2: Arc::clone(&self.l2),
            flights: Arc::clone(&self.flights),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<V, S> std::fmt::Debug for TwoTierCache<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierCache")
            .field("l1", &self.l1)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl<V, S> TwoTierCache<V, S>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    S: DurableStore,
{
    /// Create a two-tier cache. `config` configures L1; its ttl also bounds
    /// the age of L2 entries served on a read.
    pub fn new(config: CacheConfig, l2: S) -> Self {
        Self::from_parts(MemoryCache::new(config), l2)
    }

    pub fn try_new(config: CacheConfig, l2: S) -> StowageResult<Self> {
        Ok(Self::from_parts(MemoryCache::try_new(config)?, l2))
    }

    /// Compose an existing L1 cache with an L2 store.
    pub fn from_parts(l1: MemoryCache<V>, l2: S) -> Self {
        Self {
            l1,
            l2: Arc::new(l2),
            flights: Arc::new(SingleFlight::new()),
            counters: Arc::new(TierCounters::default()),
        }
    }

    pub fn l1(&self) -> &MemoryCache<V> {
        &self.l1
    }

    pub fn l2(&self) -> &S {
        &self.l2
    }

    /// Get a value from L1, falling back to L2. An L2 hit is promoted into
    /// L1 before it is returned.
    pub async fn get<Q: CacheKey + ?Sized>(&self, key: &Q) -> Option<V> {
        let key = key.cache_key();
        if let Some(value) = self.l1.get(&key) {
            return Some(value);
        }

        let value = self.read_l2(&key).await?;
        self.l1.set(&key, value.clone());
        TierCounters::bump(&self.counters.promotions);
        debug!(key = %key, "promoted durable entry into L1");
        Some(value)
    }

    async fn read_l2(&self, key: &str) -> Option<V> {
        let bytes = match self.l2.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                TierCounters::bump(&self.counters.l2_misses);
                return None;
            }
            Err(e) => {
                TierCounters::bump(&self.counters.l2_read_failures);
                warn!(key = %key, error = %e, "durable read failed, treating as miss");
                return None;
            }
        };

        let entry = match decode_entry::<V>(key, &bytes) {
            Ok(entry) => entry,
            Err(e) => {
                TierCounters::bump(&self.counters.l2_read_failures);
                warn!(key = %key, error = %e, "undecodable durable entry, treating as miss");
                return None;
            }
        };

        if entry.is_stale(self.l1.config().ttl, Utc::now()) {
            TierCounters::bump(&self.counters.l2_stale);
            debug!(key = %key, stored_at = %entry.stored_at, "durable entry is stale");
            return None;
        }

        TierCounters::bump(&self.counters.l2_hits);
        Some(entry.value)
    }

    /// Store a value in L1, then in L2. L2 failures are logged and
    /// swallowed.
    pub async fn set<Q: CacheKey + ?Sized>(&self, key: &Q, value: V) {
        let key = key.cache_key();
        let encoded = encode_entry(&key, &value, Utc::now());
        self.l1.set(&key, value);

        let result = match encoded {
            Ok(bytes) => self.l2.set(&key, bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            TierCounters::bump(&self.counters.l2_write_failures);
            warn!(key = %key, error = %e, "durable write failed, L1 remains authoritative");
        }
    }

    /// Whether either tier holds a live value. Does not promote.
    pub async fn has<Q: CacheKey + ?Sized>(&self, key: &Q) -> bool {
        let key = key.cache_key();
        if self.l1.has(&key) {
            return true;
        }
        match self.l2.get(&key).await {
            Ok(Some(bytes)) => decode_entry::<V>(&key, &bytes)
                .map(|entry| !entry.is_stale(self.l1.config().ttl, Utc::now()))
                .unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                warn!(key = %key, error = %e, "durable read failed during has");
                false
            }
        }
    }

    /// Remove a key from both tiers. Returns whether either tier held it.
    pub async fn delete<Q: CacheKey + ?Sized>(&self, key: &Q) -> bool {
        let key = key.cache_key();
        let in_l1 = self.l1.delete(&key);
        let in_l2 = match self.l2.delete(&key).await {
            Ok(existed) => existed,
            Err(e) => {
                TierCounters::bump(&self.counters.l2_write_failures);
                warn!(key = %key, error = %e, "durable delete failed");
                false
            }
        };
        in_l1 || in_l2
    }

    /// Return the cached value from either tier, or compute it and store it
    /// in both. The factory runs only on a total miss, and at most once per
    /// key at a time.
    pub async fn get_or_set<Q, F, Fut, E>(&self, key: &Q, factory: F) -> Result<V, E>
    where
        Q: CacheKey + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = key.cache_key();
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }

        let _permit = self.flights.acquire(&key).await;
        if let Some(value) = self.l1.lookup(&key) {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(&key, value.clone()).await;
        Ok(value)
    }

    /// Register `key` so that invalidating `topic` deletes it from both
    /// tiers.
    pub fn add_dependency<Q: CacheKey + ?Sized>(
        &self,
        key: &Q,
        topic: &str,
    ) -> Result<(), CacheError> {
        self.l1.add_dependency(key, topic)
    }

    /// Delete every key registered under `topic` from both tiers and forget
    /// the topic. Returns the number of keys that were present in either
    /// tier.
    pub async fn invalidate_by_dependency(&self, topic: &str) -> Result<usize, CacheError> {
        let keys = self.l1.dependencies().take(topic)?;
        let mut removed = 0;
        for key in &keys {
            if self.delete(key.as_str()).await {
                removed += 1;
            }
        }
        debug!(topic, registered = keys.len(), removed, "invalidated two-tier topic");
        Ok(removed)
    }

    /// Alias of [`Self::invalidate_by_dependency`].
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize, CacheError> {
        self.invalidate_by_dependency(tag).await
    }

    pub fn stats(&self) -> TwoTierStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TwoTierStats {
            l1: self.l1.stats(),
            l2_hits: load(&self.counters.l2_hits),
            l2_misses: load(&self.counters.l2_misses),
            l2_stale: load(&self.counters.l2_stale),
            l2_read_failures: load(&self.counters.l2_read_failures),
            l2_write_failures: load(&self.counters.l2_write_failures),
            promotions: load(&self.counters.promotions),
        }
    }
}
