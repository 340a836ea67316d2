//! STOWAGE Core - Shared Types
//!
//! Errors, configuration and key types shared by the cache and executor
//! crates. This crate holds no runtime state.

pub mod config;
pub mod constants;
pub mod error;

pub use config::{CacheConfig, CircuitBreakerConfig, EvictionPolicy, PoolConfig, TaskQueueConfig};
pub use error::{
    CacheError, ConfigError, PoolError, QueueError, StorageError, StowageError, StowageResult,
};

use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Identifier of a task submitted to a task queue.
pub type TaskId = String;

/// Generate a fresh task identifier (UUIDv7, timestamp-sortable).
pub fn new_task_id() -> TaskId {
    Uuid::now_v7().to_string()
}

// ============================================================================
// CACHE KEYS
// ============================================================================

/// Types usable as cache keys.
///
/// Caches store entries under a string form of the key. Implementations must
/// be injective: two keys that compare unequal must never render to the same
/// string.
pub trait CacheKey {
    /// Render the key in its stored string form.
    fn cache_key(&self) -> String;
}

impl CacheKey for str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl CacheKey for Uuid {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl<T: CacheKey + ?Sized> CacheKey for &T {
    fn cache_key(&self) -> String {
        (**self).cache_key()
    }
}

macro_rules! impl_cache_key_for_ints {
    ($($t:ty),*) => {
        $(
            impl CacheKey for $t {
                fn cache_key(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_cache_key_for_ints!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

impl<A: CacheKey, B: CacheKey> CacheKey for (A, B) {
    fn cache_key(&self) -> String {
        let first = self.0.cache_key();
        // Length prefix keeps ("a:b", "c") distinct from ("a", "b:c").
        format!("{}:{}:{}", first.len(), first, self.1.cache_key())
    }
}
