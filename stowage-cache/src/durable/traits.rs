//! Durable store trait.

use std::sync::Arc;

use async_trait::async_trait;
use stowage_core::StowageResult;

/// Byte-level key/value store backing the second cache tier.
///
/// Implementations must be thread-safe. A failed `set` is non-fatal to the
/// caller: the two-tier cache logs it and keeps serving from L1.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Get the serialized entry stored under `key`, if any.
    async fn get(&self, key: &str) -> StowageResult<Option<Vec<u8>>>;

    /// Store a serialized entry under `key`, replacing any previous one.
    async fn set(&self, key: &str, entry: Vec<u8>) -> StowageResult<()>;

    /// Remove the entry under `key`. Returns whether one existed.
    async fn delete(&self, key: &str) -> StowageResult<bool>;
}

#[async_trait]
impl<S: DurableStore + ?Sized> DurableStore for Arc<S> {
    async fn get(&self, key: &str) -> StowageResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, entry: Vec<u8>) -> StowageResult<()> {
        (**self).set(key, entry).await
    }

    async fn delete(&self, key: &str) -> StowageResult<bool> {
        (**self).delete(key).await
    }
}
