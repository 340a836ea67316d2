//! Bounded task queue with priority dispatch, retries, backoff and timeouts.
//!
//! Tasks wait in a priority heap until a concurrency slot frees up. Settling
//! a task (success or exhausted failure) frees its slot and re-runs dispatch;
//! there is no polling loop. A retrying task keeps its slot while it backs
//! off.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use stowage_core::constants::DEFAULT_TASK_PRIORITY;
use stowage_core::{new_task_id, QueueError, StowageResult, TaskId, TaskQueueConfig};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::TaskError;

// ============================================================================
// TASK TYPES
// ============================================================================

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// Never enqueued, cancelled, or forgotten.
    NotFound,
}

/// Per-task overrides of the queue configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Higher runs first. Equal priorities run in enqueue order.
    pub priority: i32,
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_TASK_PRIORITY,
            timeout: None,
            retry_attempts: None,
        }
    }
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Per-attempt timeout. Zero disables the timeout race.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }
}

/// Snapshot of queue occupancy and lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_enqueued: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,
}

// ============================================================================
// TASK HANDLE
// ============================================================================

/// Resolves to the task's final outcome.
///
/// Dropping the handle does not cancel the task; it keeps running and its
/// outcome is recorded in the queue's status sets.
#[derive(Debug)]
pub struct TaskHandle<T, E> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T, TaskError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The sender only disappears without a value when the task was
        // dropped from the pending heap.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}

// ============================================================================
// QUEUE STATE
// ============================================================================

struct QueuedTask {
    id: TaskId,
    priority: i32,
    seq: u64,
    job: BoxFuture<'static, bool>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<QueuedTask>,
    running: HashSet<TaskId>,
    completed: HashSet<TaskId>,
    failed: HashSet<TaskId>,
    next_seq: u64,
    total_enqueued: u64,
    total_cancelled: u64,
}

impl QueueState {
    fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|task| task.id == id)
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

struct QueueInner {
    config: TaskQueueConfig,
    state: Mutex<QueueState>,
    idle: Notify,
    retries: AtomicU64,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, id: &str, succeeded: bool) {
        let mut state = self.lock();
        state.running.remove(id);
        if succeeded {
            state.completed.insert(id.to_string());
        } else {
            state.failed.insert(id.to_string());
        }
        if state.is_idle() {
            self.idle.notify_waiters();
        }
    }
}

/// Start pending tasks until the concurrency limit is reached.
fn dispatch(inner: &Arc<QueueInner>) {
    loop {
        let task = {
            let mut state = inner.lock();
            if state.running.len() >= inner.config.max_concurrent {
                return;
            }
            let Some(task) = state.pending.pop() else {
                return;
            };
            state.running.insert(task.id.clone());
            task
        };

        debug!(task_id = %task.id, priority = task.priority, "dispatching task");
        let owner = Arc::clone(inner);
        tokio::spawn(async move {
            let QueuedTask { id, job, .. } = task;
            let succeeded = job.await;
            owner.settle(&id, succeeded);
            dispatch(&owner);
        });
    }
}

// ============================================================================
// ATTEMPT LOOP
// ============================================================================

/// Run `task` until it succeeds or its retries are exhausted.
async fn run_attempts<T, E, F, Fut>(
    id: &str,
    mut task: F,
    policy: &TaskQueueConfig,
    retries: &AtomicU64,
) -> Result<T, TaskError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let total = policy.retry_attempts.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        // Building the future can panic too, not only polling it.
        let run = match std::panic::catch_unwind(AssertUnwindSafe(&mut task)) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind(),
            Err(_) => {
                warn!(task_id = %id, attempt, "task panicked");
                return Err(TaskError::Panicked { attempts: attempt });
            }
        };
        let outcome = if policy.timeout.is_zero() {
            Some(run.await)
        } else {
            tokio::time::timeout(policy.timeout, run).await.ok()
        };

        let error = match outcome {
            Some(Ok(Ok(value))) => return Ok(value),
            Some(Ok(Err(error))) => TaskError::Failed {
                attempts: attempt,
                error,
            },
            Some(Err(_)) => {
                warn!(task_id = %id, attempt, "task panicked");
                return Err(TaskError::Panicked { attempts: attempt });
            }
            None => TaskError::Timeout {
                attempts: attempt,
                timeout: policy.timeout,
            },
        };

        if attempt >= total {
            warn!(task_id = %id, attempts = attempt, error = %error, "task failed, retries exhausted");
            return Err(error);
        }

        let delay = policy.retry_delay_for(attempt - 1);
        retries.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(
            task_id = %id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying task"
        );
        tokio::time::sleep(delay).await;
    }
}

// ============================================================================
// TASK QUEUE
// ============================================================================

/// Bounded concurrent task queue.
///
/// Cloning yields a handle to the same queue. Enqueueing spawns onto the
/// current Tokio runtime, so it must be called from within one.
///
/// # Example
///
/// ```ignore
/// let queue = TaskQueue::new(TaskQueueConfig::new().with_max_concurrent(2));
///
/// let handle = queue.enqueue("sync-prices", || async { prices.refresh().await }, 10)?;
/// assert!(matches!(
///     queue.get_status("sync-prices"),
///     TaskStatus::Queued | TaskStatus::Running
/// ));
/// let refreshed = handle.await?;
/// ```
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TaskQueue {
    /// Create a queue. A `max_concurrent` of zero is raised to one.
    pub fn new(mut config: TaskQueueConfig) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
                retries: AtomicU64::new(0),
            }),
        }
    }

    /// Create a queue after validating the configuration.
    pub fn try_new(config: TaskQueueConfig) -> StowageResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn with_defaults() -> Self {
        Self::new(TaskQueueConfig::default())
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.inner.config
    }

    /// Enqueue `task` under `id` with the given priority.
    ///
    /// `task` is called once per attempt. Fails if a task with the same id is
    /// still queued or running.
    pub fn enqueue<T, E, F, Fut>(
        &self,
        id: impl Into<TaskId>,
        task: F,
        priority: i32,
    ) -> Result<TaskHandle<T, E>, QueueError>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.enqueue_with(id, task, TaskOptions::new().with_priority(priority))
    }

    /// Enqueue under a fresh id at default priority.
    pub fn submit<T, E, F, Fut>(&self, task: F) -> TaskHandle<T, E>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = new_task_id();
        let (handle, job) = self.prepare(id, task, TaskOptions::default());
        self.push(job);
        handle
    }

    /// Enqueue with per-task overrides.
    pub fn enqueue_with<T, E, F, Fut>(
        &self,
        id: impl Into<TaskId>,
        task: F,
        options: TaskOptions,
    ) -> Result<TaskHandle<T, E>, QueueError>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = id.into();
        {
            let mut state = self.inner.lock();
            if state.running.contains(&id) || state.is_pending(&id) {
                return Err(QueueError::DuplicateTask { id });
            }
            state.completed.remove(&id);
            state.failed.remove(&id);
        }

        let (handle, job) = self.prepare(id, task, options);
        self.push(job);
        Ok(handle)
    }

    fn prepare<T, E, F, Fut>(
        &self,
        id: TaskId,
        task: F,
        options: TaskOptions,
    ) -> (TaskHandle<T, E>, QueuedTask)
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut policy = self.inner.config.clone();
        if let Some(timeout) = options.timeout {
            policy.timeout = timeout;
        }
        if let Some(attempts) = options.retry_attempts {
            policy.retry_attempts = attempts;
        }

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let job_id = id.clone();
        let job = async move {
            let outcome = run_attempts(&job_id, task, &policy, &inner.retries).await;
            let succeeded = outcome.is_ok();
            // The caller may have dropped the handle; the status sets still
            // record the outcome.
            let _ = tx.send(outcome);
            succeeded
        }
        .boxed();

        let handle = TaskHandle { id: id.clone(), rx };
        let queued = QueuedTask {
            id,
            priority: options.priority,
            seq: 0,
            job,
        };
        (handle, queued)
    }

    fn push(&self, mut task: QueuedTask) {
        {
            let mut state = self.inner.lock();
            task.seq = state.next_seq;
            state.next_seq += 1;
            state.total_enqueued += 1;
            debug!(task_id = %task.id, priority = task.priority, "task enqueued");
            state.pending.push(task);
        }
        dispatch(&self.inner);
    }

    /// Remove a task that has not started. Returns whether it was removed;
    /// running tasks cannot be cancelled. The task's handle resolves to
    /// [`TaskError::Cancelled`].
    pub fn cancel(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.inner.lock();
            let before = state.pending.len();
            state.pending.retain(|task| task.id != id);
            let removed = state.pending.len() < before;
            if removed {
                state.total_cancelled += 1;
                if state.is_idle() {
                    self.inner.idle.notify_waiters();
                }
            }
            removed
        };
        if removed {
            debug!(task_id = %id, "task cancelled");
        }
        removed
    }

    /// Cancel every task that has not started. Returns how many were removed.
    pub fn clear_pending(&self) -> usize {
        let mut state = self.inner.lock();
        let removed = state.pending.len();
        state.pending.clear();
        state.total_cancelled += removed as u64;
        if state.is_idle() {
            self.inner.idle.notify_waiters();
        }
        removed
    }

    pub fn get_status(&self, id: &str) -> TaskStatus {
        let state = self.inner.lock();
        if state.running.contains(id) {
            TaskStatus::Running
        } else if state.completed.contains(id) {
            TaskStatus::Completed
        } else if state.failed.contains(id) {
            TaskStatus::Failed
        } else if state.is_pending(id) {
            TaskStatus::Queued
        } else {
            TaskStatus::NotFound
        }
    }

    /// Drop the ids of finished tasks. Their status becomes `NotFound`.
    pub fn forget_finished(&self) {
        let mut state = self.inner.lock();
        state.completed.clear();
        state.failed.clear();
    }

    pub fn stats(&self) -> TaskQueueStats {
        let state = self.inner.lock();
        TaskQueueStats {
            queued: state.pending.len(),
            running: state.running.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            total_enqueued: state.total_enqueued,
            total_cancelled: state.total_cancelled,
            total_retries: self.inner.retries.load(AtomicOrdering::Relaxed),
        }
    }

    /// Wait until nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }
}
