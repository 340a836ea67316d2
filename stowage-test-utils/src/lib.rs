//! STOWAGE Test Utilities
//!
//! Shared test infrastructure for the STOWAGE workspace:
//! - Failure-injecting durable store for two-tier cache tests
//! - Counting resource factory for pool tests
//! - Concurrency probe for observing peak parallelism
//! - Proptest generators for cache keys, configs and operation sequences
//! - Tracing setup for tests

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use stowage_cache::{DurableStore, InMemoryDurableStore};
pub use stowage_core::{
    CacheConfig, EvictionPolicy, PoolError, StorageError, StowageError, StowageResult,
};
pub use stowage_exec::ResourceFactory;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `debug` for STOWAGE crates. Safe to call
/// from every test.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stowage_cache=debug,stowage_exec=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK DURABLE STORE
// ============================================================================

/// In-memory durable store whose reads and writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryDurableStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls, failed or not.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set` calls, failed or not.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Whether an entry is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn get(&self, key: &str) -> StowageResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: Vec<u8>) -> StowageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> StowageResult<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed {
                key: key.to_string(),
                reason: "injected delete failure".to_string(),
            }
            .into());
        }
        self.inner.delete(key).await
    }
}

// ============================================================================
// MOCK RESOURCE FACTORY
// ============================================================================

/// Shared counters of a [`CountingFactory`], readable after the factory has
/// been moved into a pool.
#[derive(Debug, Default)]
pub struct FactoryCounters {
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub failures: AtomicU64,
}

/// Resource factory producing sequential `u64` ids.
#[derive(Debug, Clone, Default)]
pub struct CountingFactory {
    counters: Arc<FactoryCounters>,
    fail_creates: Arc<AtomicBool>,
    create_delay: Option<Duration>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every `create`.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn counters(&self) -> Arc<FactoryCounters> {
        Arc::clone(&self.counters)
    }

    /// Make subsequent creations fail until turned off. Affects clones.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceFactory<u64> for CountingFactory {
    async fn create(&self) -> StowageResult<u64> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_creates.load(Ordering::SeqCst) {
            self.counters.failures.fetch_add(1, Ordering::SeqCst);
            return Err(PoolError::CreationFailed {
                reason: "injected creation failure".to_string(),
            }
            .into());
        }
        Ok(self.counters.created.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, _resource: u64) {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// CONCURRENCY PROBE
// ============================================================================

/// Tracks how many callers are inside a section at once.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark entry into the section until the guard drops.
    pub fn enter(&self) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard {
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Leaves the probed section on drop.
#[derive(Debug)]
pub struct ProbeGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys, configs and operation sequences.

    use super::*;
    use proptest::prelude::*;

    /// Short keys from a small alphabet so sequences revisit keys often.
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        "[a-f]{1,2}"
    }

    pub fn arb_eviction_policy() -> impl Strategy<Value = EvictionPolicy> {
        prop_oneof![
            Just(EvictionPolicy::Lru),
            Just(EvictionPolicy::Lfu),
            Just(EvictionPolicy::Fifo),
            Just(EvictionPolicy::Ttl),
        ]
    }

    /// Small capacity, no expiry and no background sweeper.
    pub fn arb_cache_config() -> impl Strategy<Value = CacheConfig> {
        (1usize..8, arb_eviction_policy()).prop_map(|(max_size, policy)| {
            CacheConfig::new()
                .with_max_size(max_size)
                .without_ttl()
                .with_eviction_policy(policy)
                .with_sweep_interval(Duration::ZERO)
        })
    }

    /// One step of a cache workload.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CacheOp {
        Get(String),
        Set(String, u32),
        Delete(String),
    }

    pub fn arb_cache_op() -> impl Strategy<Value = CacheOp> {
        prop_oneof![
            arb_cache_key().prop_map(CacheOp::Get),
            (arb_cache_key(), any::<u32>()).prop_map(|(k, v)| CacheOp::Set(k, v)),
            arb_cache_key().prop_map(CacheOp::Delete),
        ]
    }

    pub fn arb_cache_ops(max_len: usize) -> impl Strategy<Value = Vec<CacheOp>> {
        prop::collection::vec(arb_cache_op(), 0..max_len)
    }
}
