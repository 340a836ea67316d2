//! Durable store collaborator used as the second cache tier.
//!
//! The two-tier cache never interprets stored bytes beyond the entry codec
//! in [`codec`]. Stores only need byte-level get/set/delete by string key.

pub mod codec;
pub mod lmdb;
pub mod memory;
pub mod traits;

pub use codec::{decode_entry, encode_entry, StoredEntry};
pub use lmdb::{LmdbDurableStore, LmdbStoreError};
pub use memory::InMemoryDurableStore;
pub use traits::DurableStore;
