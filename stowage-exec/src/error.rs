//! Errors for executor components.
//!
//! Each wraps the caller's own error type `E` unchanged, so a failure of the
//! wrapped work is always distinguishable from a failure of the executor.

use std::time::Duration;

use thiserror::Error;

/// Terminal outcome of a queued task that did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError<E> {
    /// The last attempt exceeded its timeout budget.
    #[error("Task timed out after {attempts} attempt(s), {timeout:?} each")]
    Timeout { attempts: u32, timeout: Duration },

    /// The last attempt returned an error.
    #[error("Task failed after {attempts} attempt(s): {error}")]
    Failed { attempts: u32, error: E },

    /// An attempt panicked. Panics are not retried.
    #[error("Task panicked on attempt {attempts}")]
    Panicked { attempts: u32 },

    /// The task was removed before it started running.
    #[error("Task was cancelled before it started")]
    Cancelled,
}

impl<E> TaskError<E> {
    /// Number of attempts made, zero if the task never ran.
    pub fn attempts(&self) -> u32 {
        match self {
            TaskError::Timeout { attempts, .. }
            | TaskError::Failed { attempts, .. }
            | TaskError::Panicked { attempts } => *attempts,
            TaskError::Cancelled => 0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }
}

/// Error returned by [`crate::CircuitBreaker::execute`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("Circuit breaker is open")]
    Open,

    /// The operation ran and failed. The error is passed through unchanged.
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open)
    }

    /// The operation's own error, if it ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            CircuitBreakerError::Operation(e) => Some(e),
            CircuitBreakerError::Open => None,
        }
    }
}

/// Error returned by a debounced call that never completed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DebounceError {
    /// A newer call replaced this one before it finished.
    #[error("Superseded by a newer call")]
    Superseded,
}
