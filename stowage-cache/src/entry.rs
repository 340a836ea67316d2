//! Entry store: fixed-capacity map from stringified key to entry plus
//! per-entry access metadata.
//!
//! Ordering decisions (LRU, FIFO, tie-breaks) use a logical clock rather than
//! wall time so that two operations inside the same clock tick still have a
//! well-defined order. Wall time is kept for expiry and for callers inspecting
//! entries.

use std::collections::HashMap;
use std::time::Duration;

use stowage_core::{CacheConfig, EvictionPolicy};
use tokio::time::Instant;
use tracing::debug;

use crate::eviction::select_victim;
use crate::stats::CacheStats;

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// A cached value with its access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
    pub(crate) inserted_seq: u64,
    pub(crate) accessed_seq: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, now: Instant, seq: u64) -> Self {
        Self {
            value,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            inserted_seq: seq,
            accessed_seq: seq,
        }
    }

    /// The cached value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// When the entry was written.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the entry was last read (or written, if never read).
    pub fn last_accessed_at(&self) -> Instant {
        self.last_accessed_at
    }

    /// Number of successful reads.
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// An entry is expired once strictly more than `ttl` has passed since it
    /// was written. A zero ttl never expires.
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        !ttl.is_zero() && now.saturating_duration_since(self.created_at) > ttl
    }

    fn touch(&mut self, now: Instant, seq: u64) {
        self.last_accessed_at = now;
        self.accessed_seq = seq;
        self.access_count += 1;
    }

    fn info(&self, now: Instant) -> EntryInfo {
        EntryInfo {
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            age: now.saturating_duration_since(self.created_at),
        }
    }
}

/// Snapshot of an entry's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub age: Duration,
}

// ============================================================================
// ENTRY STORE
// ============================================================================

/// Capacity-bounded entry map. Not synchronized; the owning cache wraps it in
/// a mutex so sweeps and evictions never interleave.
#[derive(Debug)]
pub(crate) struct EntryStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    max_size: usize,
    ttl: Duration,
    policy: EvictionPolicy,
    clock: u64,
    stats: CacheStats,
}

impl<V> EntryStore<V> {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::with_capacity(config.max_size.min(4096)),
            max_size: config.max_size.max(1),
            ttl: config.ttl,
            policy: config.eviction_policy,
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Whether a live entry exists. Does not count as an access.
    pub(crate) fn contains_live(&mut self, key: &str, now: Instant) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(self.ttl, now),
            None => return false,
        };
        if expired {
            self.entries.remove(key);
            self.stats.expirations += 1;
        }
        !expired
    }

    /// Insert or replace an entry, evicting one victim first when a new key
    /// would exceed capacity.
    pub(crate) fn insert(&mut self, key: String, value: V, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_one(now);
        }

        let seq = self.tick();
        self.entries.insert(key, CacheEntry::new(value, now, seq));
        self.stats.sets += 1;
    }

    fn evict_one(&mut self, now: Instant) -> Option<String> {
        let victim = select_victim(self.policy, &self.entries, self.ttl, now)?;
        self.entries.remove(&victim);
        self.stats.evictions += 1;
        debug!(key = %victim, policy = %self.policy, "evicted cache entry");
        Some(victim)
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove every expired entry. Returns the number removed.
    pub(crate) fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(ttl, now));
        let removed = before - self.entries.len();
        self.stats.expirations += removed as u64;
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn info(&self, key: &str, now: Instant) -> Option<EntryInfo> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.ttl, now))
            .map(|entry| entry.info(now))
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len() as u64,
            ..self.stats.clone()
        }
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }
}

impl<V: Clone> EntryStore<V> {
    /// Read and touch a live entry without recording hit/miss statistics.
    /// Expired entries are removed.
    pub(crate) fn lookup(&mut self, key: &str, now: Instant) -> Option<V> {
        let expired = self.entries.get(key)?.is_expired(self.ttl, now);
        if expired {
            self.entries.remove(key);
            self.stats.expirations += 1;
            return None;
        }

        let seq = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.touch(now, seq);
        Some(entry.value.clone())
    }

    /// Read a value, recording a hit or a miss.
    pub(crate) fn get(&mut self, key: &str, now: Instant) -> Option<V> {
        let value = self.lookup(key, now);
        if value.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        value
    }
}
