//! Error types for STOWAGE operations
//!
//! A cache miss is never an error: lookups return `Option`. Only failures of
//! collaborators (durable stores, resource factories) and misuse of the API
//! surface here. Errors produced by caller-supplied closures keep their own
//! type and are wrapped by the generic error enums in `stowage-exec`.

use std::time::Duration;
use thiserror::Error;

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Pattern invalidation is not supported: {pattern}")]
    PatternInvalidationUnsupported { pattern: String },

    #[error("Failed to encode entry for key {key}: {reason}")]
    EncodeFailed { key: String, reason: String },

    #[error("Failed to decode entry for key {key}: {reason}")]
    DecodeFailed { key: String, reason: String },
}

/// Durable store (L2) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Read failed for key {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Delete failed for key {key}: {reason}")]
    DeleteFailed { key: String, reason: String },

    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Resource pool errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Resource creation failed: {reason}")]
    CreationFailed { reason: String },

    #[error("Timed out after {waited:?} waiting for a pooled resource")]
    AcquireTimeout { waited: Duration },

    #[error("Pool is shutting down")]
    Closed,
}

/// Task queue errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Task {id} is already queued or running")]
    DuplicateTask { id: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown eviction policy: {value}")]
    UnknownEvictionPolicy { value: String },
}

/// Master error type for all STOWAGE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StowageError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for STOWAGE operations.
pub type StowageResult<T> = Result<T, StowageError>;

// =============================================================================
// TESTS
// =============================================================================
