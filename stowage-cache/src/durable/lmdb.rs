//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped key/value
//! store that survives restarts. Keys are the cache key strings as UTF-8;
//! values are the bytes produced by the entry codec, stored opaquely.
//!
//! LMDB transactions are synchronous and short, so they run inline on the
//! calling task.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use stowage_core::{StorageError, StowageError, StowageResult};

use super::traits::DurableStore;

/// Error type for LMDB store setup.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StowageError {
    fn from(e: LmdbStoreError) -> Self {
        StowageError::Storage(StorageError::Unavailable {
            reason: e.to_string(),
        })
    }
}

/// Durable store persisted in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// let l2 = LmdbDurableStore::open("/var/lib/app/cache", 64)?;
/// let cache = TwoTierCache::new(CacheConfig::default(), l2);
/// ```
pub struct LmdbDurableStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbDurableStore {
    /// Open (creating if needed) a store under `path`, capped at
    /// `max_size_mb` megabytes.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the memory map is never handed out beyond a transaction's lifetime.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Number of stored entries.
    pub fn len(&self) -> StowageResult<u64> {
        let rtxn = self.env.read_txn().map_err(|e| unavailable(&e))?;
        self.db.len(&rtxn).map_err(|e| unavailable(&e))
    }

    pub fn is_empty(&self) -> StowageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl std::fmt::Debug for LmdbDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbDurableStore")
            .field("path", &self.env.path())
            .finish()
    }
}

fn unavailable(e: &heed::Error) -> StowageError {
    StorageError::Unavailable {
        reason: e.to_string(),
    }
    .into()
}

#[async_trait]
impl DurableStore for LmdbDurableStore {
    async fn get(&self, key: &str) -> StowageResult<Option<Vec<u8>>> {
        let read_failed = |e: heed::Error| StorageError::ReadFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let rtxn = self.env.read_txn().map_err(read_failed)?;
        let bytes = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(read_failed)?
            .map(<[u8]>::to_vec);
        Ok(bytes)
    }

    async fn set(&self, key: &str, entry: Vec<u8>) -> StowageResult<()> {
        let write_failed = |e: heed::Error| StorageError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let mut wtxn = self.env.write_txn().map_err(write_failed)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &entry)
            .map_err(write_failed)?;
        wtxn.commit().map_err(write_failed)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StowageResult<bool> {
        let delete_failed = |e: heed::Error| StorageError::DeleteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let mut wtxn = self.env.write_txn().map_err(delete_failed)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(delete_failed)?;
        wtxn.commit().map_err(delete_failed)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbDurableStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbDurableStore::open(temp_dir.path(), 10).expect("store should open");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let (store, _dir) = create_test_store();
        store.set("user:1", b"payload".to_vec()).await.unwrap();

        assert_eq!(store.get("user:1").await.unwrap(), Some(b"payload".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.delete("user:1").await.unwrap());
        assert!(!store.delete("user:1").await.unwrap());
        assert_eq!(store.get("user:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbDurableStore::open(temp_dir.path(), 10).unwrap();
            store.set("k", vec![7; 16]).await.unwrap();
        }

        let store = LmdbDurableStore::open(temp_dir.path(), 10).unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![7; 16]));
    }
}
