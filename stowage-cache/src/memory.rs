//! Single-tier in-memory cache.
//!
//! Entry store + eviction policy + expiry. Expired entries are removed
//! lazily when touched and eagerly by a background sweeper. All mutation of
//! the entry store goes through one mutex, so a sweep can never interleave
//! with an eviction.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use stowage_core::{CacheConfig, CacheError, CacheKey, StowageResult};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::dependency::DependencyIndex;
use crate::entry::{EntryInfo, EntryStore};
use crate::flight::SingleFlight;
use crate::memoize::Memoized;
use crate::stats::CacheStats;

// ============================================================================
// SWEEPER
// ============================================================================

/// Aborts the sweeper task when the owning cache goes away.
#[derive(Debug)]
struct SweeperHandle(JoinHandle<()>);

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_sweeper<V>(inner: Weak<CacheInner<V>>, config: &CacheConfig) -> Option<SweeperHandle>
where
    V: Clone + Send + 'static,
{
    if config.sweep_interval.is_zero() || !config.expires() {
        return None;
    }
    // Outside a runtime there is nothing to drive the timer; lazy expiry and
    // `sweep_expired` still apply.
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let period = config.sweep_interval;

    let task = runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let removed = inner.lock().sweep(Instant::now());
            if removed > 0 {
                debug!(removed, "swept expired cache entries");
            }
        }
    });

    Some(SweeperHandle(task))
}

// ============================================================================
// MEMORY CACHE
// ============================================================================

struct CacheInner<V> {
    config: CacheConfig,
    store: Mutex<EntryStore<V>>,
    dependencies: DependencyIndex,
    flights: SingleFlight,
    _sweeper: Option<SweeperHandle>,
}

impl<V> CacheInner<V> {
    fn lock(&self) -> MutexGuard<'_, EntryStore<V>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded in-memory cache.
///
/// Cloning is cheap and yields a handle to the same entries.
///
/// # Example
///
/// ```ignore
/// let cache: MemoryCache<Profile> = MemoryCache::new(
///     CacheConfig::new().with_max_size(500).with_eviction_policy(EvictionPolicy::Lfu),
/// );
///
/// let profile = cache
///     .get_or_set("user:42", || async { api.fetch_profile(42).await })
///     .await?;
/// cache.add_dependency("user:42", "users")?;
///
/// // Later, after a bulk user update:
/// cache.invalidate_by_dependency("users")?;
/// ```
pub struct MemoryCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for MemoryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("config", &self.inner.config)
            .field("len", &self.inner.lock().len())
            .finish()
    }
}

impl<V> MemoryCache<V>
where
    V: Clone + Send + 'static,
{
    /// Create a cache. When called inside a Tokio runtime with a non-zero
    /// sweep interval and ttl, a background sweeper runs until the last
    /// handle is dropped.
    pub fn new(config: CacheConfig) -> Self {
        let inner = Arc::new_cyclic(|weak| CacheInner {
            _sweeper: spawn_sweeper(weak.clone(), &config),
            store: Mutex::new(EntryStore::new(&config)),
            dependencies: DependencyIndex::new(),
            flights: SingleFlight::new(),
            config,
        });
        Self { inner }
    }

    /// Create a cache after validating the configuration.
    pub fn try_new(config: CacheConfig) -> StowageResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get a value. Expired entries are removed and reported as a miss.
    pub fn get<Q: CacheKey + ?Sized>(&self, key: &Q) -> Option<V> {
        self.inner.lock().get(&key.cache_key(), Instant::now())
    }

    /// Store a value, evicting one entry first if the cache is full.
    pub fn set<Q: CacheKey + ?Sized>(&self, key: &Q, value: V) {
        self.inner
            .lock()
            .insert(key.cache_key(), value, Instant::now());
    }

    /// Whether a live (unexpired) entry exists. Not counted as an access.
    pub fn has<Q: CacheKey + ?Sized>(&self, key: &Q) -> bool {
        self.inner
            .lock()
            .contains_live(&key.cache_key(), Instant::now())
    }

    /// Remove an entry. Returns whether one was present.
    pub fn delete<Q: CacheKey + ?Sized>(&self, key: &Q) -> bool {
        self.inner.lock().remove(&key.cache_key())
    }

    /// Remove every entry and every dependency registration.
    pub fn clear(&self) {
        self.inner.lock().clear();
        self.inner.dependencies.clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored keys in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().keys()
    }

    /// Metadata for a live entry, without touching it.
    pub fn entry_info<Q: CacheKey + ?Sized>(&self, key: &Q) -> Option<EntryInfo> {
        self.inner.lock().info(&key.cache_key(), Instant::now())
    }

    /// Remove every expired entry now. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        self.inner.lock().sweep(Instant::now())
    }

    /// Read and touch a live entry without recording a hit or miss.
    pub(crate) fn lookup(&self, key: &str) -> Option<V> {
        self.inner.lock().lookup(key, Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }

    pub fn reset_stats(&self) {
        self.inner.lock().reset_stats();
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// Concurrent calls for the same key are coalesced: one factory runs, the
    /// others wait and then read what it stored. A factory error is returned
    /// only to the caller whose factory failed and is not cached; the next
    /// waiter runs its own factory.
    pub async fn get_or_set<Q, F, Fut, E>(&self, key: &Q, factory: F) -> Result<V, E>
    where
        Q: CacheKey + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = key.cache_key();
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let _permit = self.inner.flights.acquire(&key).await;
        if let Some(value) = self.lookup(&key) {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(&key, value.clone());
        Ok(value)
    }

    /// Synchronous `get_or_set`. Concurrent callers are not coalesced.
    pub fn get_or_insert_with<Q, F, E>(&self, key: &Q, factory: F) -> Result<V, E>
    where
        Q: CacheKey + ?Sized,
        F: FnOnce() -> Result<V, E>,
    {
        let key = key.cache_key();
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = factory()?;
        self.set(&key, value.clone());
        Ok(value)
    }

    /// Wrap `func` so results are cached under `key_fn(arg)`.
    ///
    /// The key function is supplied by the caller; arguments are never
    /// serialized implicitly.
    pub fn memoize<A, F, K>(&self, func: F, key_fn: K) -> Memoized<A, V, F, K>
    where
        A: ?Sized,
        K: Fn(&A) -> String,
    {
        Memoized::new(self.clone(), func, key_fn)
    }

    // ========================================================================
    // DEPENDENCY INVALIDATION
    // ========================================================================

    /// Register `key` so that invalidating `topic` deletes it.
    pub fn add_dependency<Q: CacheKey + ?Sized>(
        &self,
        key: &Q,
        topic: &str,
    ) -> Result<(), CacheError> {
        self.inner.dependencies.add(key.cache_key(), topic)
    }

    /// Delete every key registered under `topic` and forget the topic.
    /// Returns the number of entries removed. Wildcards are rejected.
    pub fn invalidate_by_dependency(&self, topic: &str) -> Result<usize, CacheError> {
        let keys = self.inner.dependencies.take(topic)?;
        let removed = {
            let mut store = self.inner.lock();
            keys.iter().filter(|key| store.remove(key)).count()
        };
        debug!(topic, registered = keys.len(), removed, "invalidated cache topic");
        Ok(removed)
    }

    /// Alias of [`Self::invalidate_by_dependency`].
    pub fn invalidate_by_tag(&self, tag: &str) -> Result<usize, CacheError> {
        self.invalidate_by_dependency(tag)
    }

    /// The dependency index backing this cache.
    pub fn dependencies(&self) -> &DependencyIndex {
        &self.inner.dependencies
    }
}
