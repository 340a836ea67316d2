//! Circuit breaker around an arbitrary async operation.
//!
//! Closed: calls pass through and failures are counted. Open: calls fail
//! fast without invoking the operation. Half-open: after the recovery
//! timeout one trial call is let through; its outcome closes or reopens the
//! circuit.
//!
//! Failure counts also decay passively, one per elapsed monitoring period,
//! so an isolated burst ages out instead of tripping the breaker later. The
//! decay is applied lazily from elapsed time whenever the state is read.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_core::{CircuitBreakerConfig, StowageResult};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CircuitBreakerError;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_calls: u64,
    /// Calls rejected without invoking the operation.
    pub rejected_calls: u64,
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    total_calls: u64,
    rejected_calls: u64,
    last_failure: Option<Instant>,
    last_decay: Instant,
    trial_in_flight: bool,
}

impl BreakerState {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_calls: 0,
            rejected_calls: 0,
            last_failure: None,
            last_decay: now,
            trial_in_flight: false,
        }
    }

    /// Apply one decrement per monitoring period elapsed since the last
    /// decay.
    fn decay(&mut self, period: Duration, now: Instant) {
        if period.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_decay);
        let periods = elapsed.as_nanos() / period.as_nanos();
        if periods == 0 {
            return;
        }
        let periods = u32::try_from(periods).unwrap_or(u32::MAX);
        self.failure_count = self.failure_count.saturating_sub(periods);
        self.last_decay += period.saturating_mul(periods);
    }
}

/// Fail-fast guard for a flaky downstream operation.
///
/// # Example
///
/// ```ignore
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::new().with_failure_threshold(3));
///
/// match breaker.execute(|| client.fetch_balance(account)).await {
///     Ok(balance) => render(balance),
///     Err(CircuitBreakerError::Open) => render_cached(),
///     Err(CircuitBreakerError::Operation(e)) => report(e),
/// }
/// ```
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::new(Instant::now())),
        }
    }

    /// Create a breaker after validating the configuration.
    pub fn try_new(config: CircuitBreakerConfig) -> StowageResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Lock the state with passive decay applied.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.decay(self.config.monitoring_period, Instant::now());
        state
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.lock();
        CircuitBreakerSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            total_calls: state.total_calls,
            rejected_calls: state.rejected_calls,
            last_failure: state.last_failure,
        }
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = BreakerState::new(Instant::now());
        info!("circuit breaker reset");
    }

    /// Run `operation` through the breaker.
    ///
    /// While open, returns [`CircuitBreakerError::Open`] without calling
    /// `operation`. Otherwise the operation's error is returned unchanged in
    /// [`CircuitBreakerError::Operation`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = self.admit::<E>()?;

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        drop(trial);
        result.map_err(CircuitBreakerError::Operation)
    }

    /// Decide whether a call may proceed. A half-open trial is tracked by the
    /// returned guard so that a cancelled trial frees the slot.
    fn admit<E>(&self) -> Result<Option<TrialGuard<'_>>, CircuitBreakerError<E>> {
        let now = Instant::now();
        let mut state = self.lock();
        state.total_calls += 1;

        match state.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                let recovered = state.last_failure.map_or(true, |at| {
                    now.saturating_duration_since(at) >= self.config.recovery_timeout
                });
                if recovered {
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    info!("circuit breaker half-open, allowing trial call");
                    Ok(Some(TrialGuard { breaker: self }))
                } else {
                    state.rejected_calls += 1;
                    Err(CircuitBreakerError::Open)
                }
            }
            CircuitState::HalfOpen if state.trial_in_flight => {
                state.rejected_calls += 1;
                Err(CircuitBreakerError::Open)
            }
            CircuitState::HalfOpen => {
                state.trial_in_flight = true;
                Ok(Some(TrialGuard { breaker: self }))
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        state.failure_count = 0;
        state.success_count += 1;
        if state.state != CircuitState::Closed {
            info!(from = %state.state, "circuit breaker closed");
            state.state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                warn!("circuit breaker trial failed, reopening");
            }
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                state.state = CircuitState::Open;
                warn!(
                    failures = state.failure_count,
                    recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            _ => {
                debug!(failures = state.failure_count, "circuit breaker recorded failure");
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .field("success_count", &snapshot.success_count)
            .finish()
    }
}

/// Clears the half-open trial flag when the trial call ends, including when
/// its future is dropped mid-flight.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        self.breaker
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trial_in_flight = false;
    }
}
