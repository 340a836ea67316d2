//! STOWAGE Exec - Bounded Concurrent Execution
//!
//! Building blocks for running unreliable async work without overwhelming
//! it or being dragged down by it:
//! - [`TaskQueue`] - priority dispatch with a concurrency limit, retries,
//!   backoff and per-attempt timeouts
//! - [`CircuitBreaker`] - fail fast while a dependency is unhealthy
//! - [`ResourcePool`] - bounded reuse of expensive resources
//! - [`Debouncer`] - run only the latest of a burst of calls
//!
//! Errors produced by caller work are passed back unchanged inside the
//! wrapper enums in [`error`].

pub mod breaker;
pub mod debounce;
pub mod error;
pub mod pool;
pub mod queue;

pub use breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use debounce::{DebouncedCall, Debouncer};
pub use error::{CircuitBreakerError, DebounceError, TaskError};
pub use pool::{PoolStats, PooledResource, ResourceFactory, ResourcePool};
pub use queue::{TaskHandle, TaskOptions, TaskQueue, TaskQueueStats, TaskStatus};

pub use stowage_core::{CircuitBreakerConfig, PoolConfig, TaskQueueConfig};
