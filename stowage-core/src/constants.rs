//! Constants for STOWAGE
//!
//! Default values for every configurable knob. Config structs build their
//! `Default` impls and `from_env` fallbacks from these.

// ============================================================================
// SINGLE-TIER CACHE
// ============================================================================

/// Default maximum number of entries held by a single-tier cache
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1000;

/// Default time-to-live for cache entries in seconds (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default interval between eager expiry sweeps in seconds
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;

// ============================================================================
// TASK QUEUE
// ============================================================================

/// Default number of tasks allowed to run at once
pub const DEFAULT_QUEUE_MAX_CONCURRENT: usize = 3;

/// Default number of retries after the first failed attempt
pub const DEFAULT_QUEUE_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay before the first retry in milliseconds
pub const DEFAULT_QUEUE_RETRY_DELAY_MS: u64 = 1000;

/// Default multiplier applied to the retry delay per attempt
pub const DEFAULT_QUEUE_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound on a single retry delay in milliseconds
pub const DEFAULT_QUEUE_MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Default per-attempt timeout in milliseconds
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 30_000;

/// Default priority for tasks enqueued without one
pub const DEFAULT_TASK_PRIORITY: i32 = 0;

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Consecutive failures needed to open the circuit
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit waits before allowing a trial call, in seconds
pub const DEFAULT_CIRCUIT_RECOVERY_TIMEOUT_SECS: u64 = 60;

/// Period after which one recorded failure decays away, in seconds
pub const DEFAULT_CIRCUIT_MONITORING_PERIOD_SECS: u64 = 10;

// ============================================================================
// RESOURCE POOL
// ============================================================================

/// Default number of resources a pool may have outstanding
pub const DEFAULT_POOL_MAX_SIZE: usize = 10;

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Prefix shared by every environment variable read by `from_env`
pub const ENV_PREFIX: &str = "STOWAGE_";
