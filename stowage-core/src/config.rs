//! Configuration types
//!
//! Every component takes one of these structs. Defaults come from
//! [`crate::constants`]; `from_env` overlays `STOWAGE_*` variables on top of
//! the defaults and `validate` rejects values the components cannot honor.

use crate::constants::*;
use crate::error::{ConfigError, StowageError, StowageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// ENV HELPERS
// ============================================================================

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn invalid(field: &str, value: impl fmt::Display, reason: &str) -> StowageError {
    StowageError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// EVICTION POLICY
// ============================================================================

/// Rule selecting which entry to remove when a cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the entry touched least recently
    #[default]
    Lru,
    /// Evict the entry read the fewest times
    Lfu,
    /// Evict the entry inserted first
    Fifo,
    /// Evict the first entry older than the ttl
    Ttl,
}

impl EvictionPolicy {
    /// Convert to the lowercase name used in config files and env vars.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Ttl => "ttl",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "ttl" => Ok(EvictionPolicy::Ttl),
            _ => Err(ConfigError::UnknownEvictionPolicy {
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// CACHE CONFIG
// ============================================================================

/// Configuration for a single-tier cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live entries.
    pub max_size: usize,
    /// Entry lifetime measured from insertion. Zero disables expiry.
    pub ttl: Duration,
    /// Victim selection when the cache is full.
    pub eviction_policy: EvictionPolicy,
    /// Interval of the background expiry sweep. Zero disables the sweeper.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_CACHE_MAX_SIZE,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            eviction_policy: EvictionPolicy::Lru,
            sweep_interval: Duration::from_secs(DEFAULT_CACHE_SWEEP_INTERVAL_SECS),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Disable expiry entirely.
    pub fn without_ttl(mut self) -> Self {
        self.ttl = Duration::ZERO;
        self
    }

    /// Set the eviction policy.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Set the background sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Whether entries expire at all.
    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STOWAGE_CACHE_MAX_SIZE`: Maximum entries (default: 1000)
    /// - `STOWAGE_CACHE_TTL_SECS`: Entry TTL, 0 disables (default: 300)
    /// - `STOWAGE_CACHE_EVICTION_POLICY`: lru | lfu | fifo | ttl (default: lru)
    /// - `STOWAGE_CACHE_SWEEP_INTERVAL_SECS`: Sweep interval, 0 disables (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_size: env_parse("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            ttl: env_parse("CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            eviction_policy: env_parse("CACHE_EVICTION_POLICY")
                .unwrap_or(defaults.eviction_policy),
            sweep_interval: env_parse("CACHE_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StowageResult<()> {
        if self.max_size == 0 {
            return Err(invalid(
                "max_size",
                self.max_size,
                "max_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TASK QUEUE CONFIG
// ============================================================================

/// Configuration for the bounded task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Maximum number of tasks running at once.
    pub max_concurrent: usize,
    /// Retries after the first failed attempt.
    pub retry_attempts: u32,
    /// Delay before the first retry.
    pub retry_delay: Duration,
    /// Multiplier applied per retry: `retry_delay * multiplier^attempt`.
    pub backoff_multiplier: f64,
    /// Cap on a single retry delay.
    pub max_retry_delay: Duration,
    /// Per-attempt timeout. Zero disables the timeout race.
    pub timeout: Duration,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_QUEUE_MAX_CONCURRENT,
            retry_attempts: DEFAULT_QUEUE_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_QUEUE_RETRY_DELAY_MS),
            backoff_multiplier: DEFAULT_QUEUE_BACKOFF_MULTIPLIER,
            max_retry_delay: Duration::from_millis(DEFAULT_QUEUE_MAX_RETRY_DELAY_MS),
            timeout: Duration::from_millis(DEFAULT_QUEUE_TIMEOUT_MS),
        }
    }
}

impl TaskQueueConfig {
    /// Create a new queue config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency limit.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the number of retries.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the retry delay cap.
    pub fn with_max_retry_delay(mut self, max: Duration) -> Self {
        self.max_retry_delay = max;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let millis = self.retry_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_retry_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Create TaskQueueConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STOWAGE_QUEUE_MAX_CONCURRENT` (default: 3)
    /// - `STOWAGE_QUEUE_RETRY_ATTEMPTS` (default: 3)
    /// - `STOWAGE_QUEUE_RETRY_DELAY_MS` (default: 1000)
    /// - `STOWAGE_QUEUE_BACKOFF_MULTIPLIER` (default: 2.0)
    /// - `STOWAGE_QUEUE_MAX_RETRY_DELAY_MS` (default: 30000)
    /// - `STOWAGE_QUEUE_TIMEOUT_MS`, 0 disables (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent: env_parse("QUEUE_MAX_CONCURRENT").unwrap_or(defaults.max_concurrent),
            retry_attempts: env_parse("QUEUE_RETRY_ATTEMPTS").unwrap_or(defaults.retry_attempts),
            retry_delay: env_parse("QUEUE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            backoff_multiplier: env_parse("QUEUE_BACKOFF_MULTIPLIER")
                .unwrap_or(defaults.backoff_multiplier),
            max_retry_delay: env_parse("QUEUE_MAX_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_retry_delay),
            timeout: env_parse("QUEUE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StowageResult<()> {
        if self.max_concurrent == 0 {
            return Err(invalid(
                "max_concurrent",
                self.max_concurrent,
                "max_concurrent must be greater than 0",
            ));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "backoff_multiplier",
                self.backoff_multiplier,
                "backoff_multiplier must be a finite value >= 1.0",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// CIRCUIT BREAKER CONFIG
// ============================================================================

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures needed to open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before letting a trial call through.
    pub recovery_timeout: Duration,
    /// Each elapsed period forgives one recorded failure. Zero disables decay.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            recovery_timeout: Duration::from_secs(DEFAULT_CIRCUIT_RECOVERY_TIMEOUT_SECS),
            monitoring_period: Duration::from_secs(DEFAULT_CIRCUIT_MONITORING_PERIOD_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new breaker config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the recovery timeout.
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the failure decay period.
    pub fn with_monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period = period;
        self
    }

    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STOWAGE_CIRCUIT_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `STOWAGE_CIRCUIT_RECOVERY_TIMEOUT_SECS`: How long the circuit stays open (default: 60)
    /// - `STOWAGE_CIRCUIT_MONITORING_PERIOD_SECS`: Failure decay period (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            failure_threshold: env_parse("CIRCUIT_FAILURE_THRESHOLD")
                .unwrap_or(defaults.failure_threshold),
            recovery_timeout: env_parse("CIRCUIT_RECOVERY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.recovery_timeout),
            monitoring_period: env_parse("CIRCUIT_MONITORING_PERIOD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.monitoring_period),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StowageResult<()> {
        if self.failure_threshold == 0 {
            return Err(invalid(
                "failure_threshold",
                self.failure_threshold,
                "failure_threshold must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// RESOURCE POOL CONFIG
// ============================================================================

/// Configuration for a resource pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of resources outstanding (available + borrowed).
    pub max_pool_size: usize,
    /// How long `acquire` may block. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_POOL_MAX_SIZE,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Create a new pool config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool size.
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Bound how long `acquire` waits.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Create PoolConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STOWAGE_POOL_MAX_SIZE` (default: 10)
    /// - `STOWAGE_POOL_ACQUIRE_TIMEOUT_MS` (default: unset, wait forever)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_pool_size: env_parse("POOL_MAX_SIZE").unwrap_or(defaults.max_pool_size),
            acquire_timeout: env_parse("POOL_ACQUIRE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .or(defaults.acquire_timeout),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StowageResult<()> {
        if self.max_pool_size == 0 {
            return Err(invalid(
                "max_pool_size",
                self.max_pool_size,
                "max_pool_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_policy_parse() {
        assert_eq!("LRU".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert_eq!(" lfu ".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lfu));
        assert_eq!("fifo".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Fifo));
        assert_eq!("ttl".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Ttl));
        assert!(matches!(
            "mru".parse::<EvictionPolicy>(),
            Err(ConfigError::UnknownEvictionPolicy { .. })
        ));
    }

    #[test]
    fn test_eviction_policy_serde_lowercase() {
        let json = serde_json::to_string(&EvictionPolicy::Fifo).unwrap();
        assert_eq!(json, "\"fifo\"");
        let back: EvictionPolicy = serde_json::from_str("\"lfu\"").unwrap();
        assert_eq!(back, EvictionPolicy::Lfu);
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_max_size(5)
            .with_ttl(Duration::from_secs(10))
            .with_eviction_policy(EvictionPolicy::Lfu)
            .with_sweep_interval(Duration::from_secs(1));

        assert_eq!(config.max_size, 5);
        assert_eq!(config.ttl, Duration::from_secs(10));
        assert_eq!(config.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert!(config.expires());
        assert!(!config.without_ttl().expires());
    }

    #[test]
    fn test_cache_config_rejects_zero_size() {
        let err = CacheConfig::new().with_max_size(0).validate().unwrap_err();
        assert!(matches!(err, StowageError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_retry_delay_backoff_and_cap() {
        let config = TaskQueueConfig::new()
            .with_retry_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_retry_delay(Duration::from_millis(500));

        assert_eq!(config.retry_delay_for(0), Duration::from_millis(100));
        assert_eq!(config.retry_delay_for(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay_for(2), Duration::from_millis(400));
        assert_eq!(config.retry_delay_for(3), Duration::from_millis(500));
    }

    #[test]
    fn test_queue_config_validation() {
        assert!(TaskQueueConfig::default().validate().is_ok());
        assert!(TaskQueueConfig::new().with_max_concurrent(0).validate().is_err());
        assert!(TaskQueueConfig::new()
            .with_backoff_multiplier(0.5)
            .validate()
            .is_err());
        assert!(TaskQueueConfig::new()
            .with_backoff_multiplier(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_breaker_and_pool_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::new()
            .with_failure_threshold(0)
            .validate()
            .is_err());
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::new().with_max_pool_size(0).validate().is_err());
    }

    #[test]
    fn test_from_env_reads_prefixed_vars() {
        std::env::set_var("STOWAGE_POOL_MAX_SIZE", "4");
        std::env::set_var("STOWAGE_POOL_ACQUIRE_TIMEOUT_MS", "1500");
        let config = PoolConfig::from_env();
        std::env::remove_var("STOWAGE_POOL_MAX_SIZE");
        std::env::remove_var("STOWAGE_POOL_ACQUIRE_TIMEOUT_MS");

        assert_eq!(config.max_pool_size, 4);
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        std::env::set_var("STOWAGE_CIRCUIT_FAILURE_THRESHOLD", "lots");
        let config = CircuitBreakerConfig::from_env();
        std::env::remove_var("STOWAGE_CIRCUIT_FAILURE_THRESHOLD");

        assert_eq!(config.failure_threshold, DEFAULT_CIRCUIT_FAILURE_THRESHOLD);
    }
}
