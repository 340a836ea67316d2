//! STOWAGE Cache - Bounded Caches and Durable Tiering
//!
//! An in-memory cache with pluggable eviction and ttl expiry, and a two-tier
//! cache that layers it over a durable store.
//!
//! # Keys
//!
//! Entries are stored under the string form produced by
//! [`stowage_core::CacheKey`]. Callers with composite keys implement it
//! themselves, or use [`MemoryCache::memoize`] with an explicit key function.
//!
//! # Misses are not errors
//!
//! Lookups return `Option`. Only collaborator failures and caller factory
//! errors surface as `Err`, and durable-tier failures never do: they are
//! logged and the in-memory tier stays authoritative.

mod dependency;
pub mod durable;
mod entry;
mod eviction;
mod flight;
mod memoize;
mod memory;
mod stats;
mod two_tier;

pub use dependency::DependencyIndex;
pub use durable::{
    decode_entry, encode_entry, DurableStore, InMemoryDurableStore, LmdbDurableStore,
    LmdbStoreError, StoredEntry,
};
pub use entry::{CacheEntry, EntryInfo};
pub use memoize::Memoized;
pub use memory::MemoryCache;
pub use stats::CacheStats;
pub use two_tier::{TwoTierCache, TwoTierStats};

pub use stowage_core::{CacheConfig, CacheKey, EvictionPolicy};
