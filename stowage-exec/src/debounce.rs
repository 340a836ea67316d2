//! Debounced execution: only the latest call in a burst runs.
//!
//! Each call waits out the delay before running. A newer call aborts the
//! previous one whether it is still waiting or already running, and the
//! aborted call resolves to [`DebounceError::Superseded`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::DebounceError;

/// Runs the most recent of a burst of calls after a quiet period.
///
/// # Example
///
/// ```ignore
/// let search = Debouncer::new(Duration::from_millis(300));
///
/// // Each keystroke supersedes the previous lookup.
/// let results = search.call(move || api.search(query)).await;
/// ```
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    current: Mutex<Option<AbortHandle>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `operation` to run after the delay, aborting any earlier
    /// call. Must be called from within a Tokio runtime.
    pub fn call<T, F, Fut>(&self, operation: F) -> DebouncedCall<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(operation().await);
        });

        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task.abort_handle());
        if let Some(previous) = previous {
            if !previous.is_finished() {
                debug!("debounced call superseded");
            }
            previous.abort();
        }

        DebouncedCall { rx }
    }

    /// Abort the pending or running call, if any.
    pub fn cancel(&self) -> bool {
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match current {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }
}

/// Outcome of one [`Debouncer::call`].
#[derive(Debug)]
pub struct DebouncedCall<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for DebouncedCall<T> {
    type Output = Result<T, DebounceError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| DebounceError::Superseded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_only_latest_call_runs() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        let calls: Vec<_> = (0..3)
            .map(|i| {
                let runs = Arc::clone(&runs);
                debouncer.call(move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for call in calls {
            outcomes.push(call.await);
        }
        assert_eq!(
            outcomes,
            vec![
                Err(DebounceError::Superseded),
                Err(DebounceError::Superseded),
                Ok(2)
            ]
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_call_aborts_in_flight_operation() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let first = debouncer.call(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "slow"
        });

        // Let the first call pass its delay and start running.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = debouncer.call(|| async { "fast" });

        assert_eq!(first.await, Err(DebounceError::Superseded));
        assert_eq!(second.await, Ok("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_calls_all_run() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        assert_eq!(debouncer.call(|| async { 1 }).await, Ok(1));
        assert_eq!(debouncer.call(|| async { 2 }).await, Ok(2));
        assert!(!debouncer.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_pending_call() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let call = debouncer.call(|| async { 1 });
        assert!(debouncer.cancel());
        assert_eq!(call.await, Err(DebounceError::Superseded));
    }
}
