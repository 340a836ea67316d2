//! Bounded pool of expensive resources.
//!
//! A resource is either available (owned by the pool) or borrowed (owned by
//! a [`PooledResource`] guard). Acquirers that find the pool exhausted wait
//! in FIFO order and are handed a resource, or the right to create one,
//! directly by whoever frees it. Waiting never polls.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stowage_core::{PoolConfig, PoolError, StowageResult};
use tokio::sync::oneshot;
use tracing::{debug, warn};

// ============================================================================
// FACTORY
// ============================================================================

/// Creates and disposes of pooled resources.
///
/// Creation errors are returned to the acquirer unchanged; the pool never
/// retries creation.
#[async_trait]
pub trait ResourceFactory<T: Send + 'static>: Send + Sync {
    async fn create(&self) -> StowageResult<T>;

    /// Dispose of a resource leaving the pool. Defaults to dropping it.
    async fn destroy(&self, _resource: T) {}
}

// ============================================================================
// POOL STATE
// ============================================================================

/// What a freed slot hands to the next waiter.
enum Grant<T> {
    /// An existing resource, ready to use.
    Resource(T),
    /// Capacity to create a new resource.
    Slot,
}

struct PoolState<T> {
    available: VecDeque<T>,
    /// Borrowed resources plus slots reserved for in-progress creation.
    borrowed: usize,
    waiters: VecDeque<oneshot::Sender<Grant<T>>>,
    created: u64,
    destroyed: u64,
    reused: u64,
}

/// Snapshot of pool occupancy and lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub max_pool_size: usize,
    pub available: usize,
    pub borrowed: usize,
    pub waiting: usize,
    pub created: u64,
    pub destroyed: u64,
    pub reused: u64,
}

struct PoolInner<T: Send + 'static> {
    config: PoolConfig,
    factory: Box<dyn ResourceFactory<T>>,
    state: Mutex<PoolState<T>>,
}

impl<T: Send + 'static> PoolInner<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Give `grant` to the first waiter still listening. Returns it if
    /// nobody is.
    fn hand_off(state: &mut PoolState<T>, mut grant: Grant<T>) -> Option<Grant<T>> {
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(grant) {
                Ok(()) => return None,
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    /// Return a borrowed resource or reserved slot to the pool.
    fn reclaim(&self, grant: Grant<T>) {
        let mut state = self.lock();
        match Self::hand_off(&mut state, grant) {
            None => {}
            Some(Grant::Resource(resource)) => {
                state.available.push_back(resource);
                state.borrowed = state.borrowed.saturating_sub(1);
            }
            Some(Grant::Slot) => {
                state.borrowed = state.borrowed.saturating_sub(1);
            }
        }
    }
}

// ============================================================================
// WAITER
// ============================================================================

/// A queued acquirer. If dropped before being served, any grant already sent
/// to it goes back to the pool.
struct Waiter<T: Send + 'static> {
    rx: oneshot::Receiver<Grant<T>>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Future for Waiter<T> {
    type Output = Result<Grant<T>, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| PoolError::Closed))
    }
}

impl<T: Send + 'static> Drop for Waiter<T> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(grant) = self.rx.try_recv() {
            self.pool.reclaim(grant);
        }
    }
}

/// A reserved creation slot, released unless a resource fills it.
struct SlotReservation<'a, T: Send + 'static> {
    pool: &'a Arc<PoolInner<T>>,
    armed: bool,
}

impl<T: Send + 'static> Drop for SlotReservation<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.reclaim(Grant::Slot);
        }
    }
}

// ============================================================================
// RESOURCE POOL
// ============================================================================

/// Fixed-size pool of resources built by a [`ResourceFactory`].
///
/// Cloning yields a handle to the same pool.
///
/// # Example
///
/// ```ignore
/// let pool = ResourcePool::new(PoolConfig::new().with_max_pool_size(4), RpcClientFactory::new(url));
///
/// let client = pool.acquire().await?;
/// match client.call("getBlockHeight").await {
///     Ok(_) => drop(client),
///     Err(_) => client.destroy().await,
/// }
/// ```
pub struct ResourcePool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Create a pool. A `max_pool_size` of zero is raised to one.
    pub fn new<F>(mut config: PoolConfig, factory: F) -> Self
    where
        F: ResourceFactory<T> + 'static,
    {
        config.max_pool_size = config.max_pool_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory: Box::new(factory),
                state: Mutex::new(PoolState {
                    available: VecDeque::new(),
                    borrowed: 0,
                    waiters: VecDeque::new(),
                    created: 0,
                    destroyed: 0,
                    reused: 0,
                }),
            }),
        }
    }

    /// Create a pool after validating the configuration.
    pub fn try_new<F>(config: PoolConfig, factory: F) -> StowageResult<Self>
    where
        F: ResourceFactory<T> + 'static,
    {
        config.validate()?;
        Ok(Self::new(config, factory))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn guard(&self, resource: T) -> PooledResource<T> {
        PooledResource {
            resource: Some(resource),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Borrow a resource.
    ///
    /// Reuses an available resource if there is one, creates one if the
    /// pool is below capacity, and otherwise waits for a release. Waits are
    /// bounded by `acquire_timeout` when configured. Dropping the returned
    /// future while waiting gives up the place in line without losing any
    /// resource.
    pub async fn acquire(&self) -> StowageResult<PooledResource<T>> {
        let rx = {
            let mut state = self.inner.lock();
            if let Some(resource) = state.available.pop_front() {
                state.borrowed += 1;
                state.reused += 1;
                return Ok(self.guard(resource));
            }
            if state.borrowed < self.inner.config.max_pool_size {
                state.borrowed += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        let Some(rx) = rx else {
            return self.create_in_slot().await;
        };

        debug!(waiting = self.inner.lock().waiters.len(), "pool exhausted, waiting");
        let waiter = Waiter {
            rx,
            pool: Arc::clone(&self.inner),
        };
        let grant = match self.inner.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, waiter)
                .await
                .map_err(|_| PoolError::AcquireTimeout { waited: limit })??,
            None => waiter.await?,
        };

        match grant {
            Grant::Resource(resource) => {
                self.inner.lock().reused += 1;
                Ok(self.guard(resource))
            }
            Grant::Slot => self.create_in_slot().await,
        }
    }

    /// Fill a slot already counted in `borrowed` with a new resource.
    async fn create_in_slot(&self) -> StowageResult<PooledResource<T>> {
        let mut reservation = SlotReservation {
            pool: &self.inner,
            armed: true,
        };

        match self.inner.factory.create().await {
            Ok(resource) => {
                reservation.armed = false;
                let created = {
                    let mut state = self.inner.lock();
                    state.created += 1;
                    state.created
                };
                debug!(created, "created pooled resource");
                Ok(self.guard(resource))
            }
            Err(e) => {
                warn!(error = %e, "resource creation failed");
                Err(e)
            }
        }
    }

    /// Return a borrowed resource to the pool.
    pub fn release(&self, resource: PooledResource<T>) {
        resource.release();
    }

    /// Permanently remove a borrowed resource, freeing its slot.
    pub async fn destroy(&self, resource: PooledResource<T>) {
        resource.destroy().await;
    }

    /// Destroy every available resource. Borrowed resources are unaffected
    /// and return to the pool as usual. Returns how many were destroyed.
    pub async fn clear(&self) -> usize {
        let drained: Vec<T> = {
            let mut state = self.inner.lock();
            let drained: Vec<T> = state.available.drain(..).collect();
            state.destroyed += drained.len() as u64;
            drained
        };

        let count = drained.len();
        for resource in drained {
            self.inner.factory.destroy(resource).await;
        }
        if count > 0 {
            debug!(count, "cleared pooled resources");
        }
        count
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            max_pool_size: self.inner.config.max_pool_size,
            available: state.available.len(),
            borrowed: state.borrowed,
            waiting: state.waiters.iter().filter(|tx| !tx.is_closed()).count(),
            created: state.created,
            destroyed: state.destroyed,
            reused: state.reused,
        }
    }
}

// ============================================================================
// POOLED RESOURCE
// ============================================================================

/// A borrowed resource. Returns to the pool when dropped.
pub struct PooledResource<T: Send + 'static> {
    resource: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> PooledResource<T> {
    /// Return the resource to the pool now.
    pub fn release(self) {
        drop(self);
    }

    /// Remove the resource from the pool for good, e.g. a broken
    /// connection. Its slot is freed before the factory disposes of it.
    pub async fn destroy(mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        drop(self);

        pool.reclaim(Grant::Slot);
        pool.lock().destroyed += 1;
        debug!("destroyed pooled resource");
        pool.factory.destroy(resource).await;
    }
}

impl<T: Send + 'static> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `destroy` takes the resource, and it consumes the guard.
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource accessed after destroy"),
        }
    }
}

impl<T: Send + 'static> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource accessed after destroy"),
        }
    }
}

impl<T: Send + 'static> Drop for PooledResource<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.reclaim(Grant::Resource(resource));
        }
    }
}

impl<T: Send + std::fmt::Debug + 'static> std::fmt::Debug for PooledResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledResource").field(&self.resource).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Hands out sequential ids and can be told to fail.
    #[derive(Default)]
    struct SeqFactory {
        next: AtomicU32,
        fail_next: std::sync::atomic::AtomicBool,
        destroyed: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl ResourceFactory<u32> for SeqFactory {
        async fn create(&self) -> StowageResult<u32> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(PoolError::CreationFailed {
                    reason: "refused".to_string(),
                }
                .into());
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        async fn destroy(&self, resource: u32) {
            self.destroyed.lock().unwrap().push(resource);
        }
    }

    fn pool(max: usize) -> ResourcePool<u32> {
        ResourcePool::new(
            PoolConfig::new().with_max_pool_size(max),
            SeqFactory::default(),
        )
    }

    #[tokio::test]
    async fn test_second_acquire_waits_and_reuses_same_instance() {
        let pool = pool(1);
        let first = pool.acquire().await.unwrap();
        let id = *first;

        let contender = {
            let pool = pool.clone();
            tokio::spawn(async move { *pool.acquire().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        assert_eq!(pool.stats().waiting, 1);

        pool.release(first);
        assert_eq!(contender.await.unwrap(), id);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.borrowed, 0);
    }

    #[tokio::test]
    async fn test_available_resources_are_reused() {
        let pool = pool(3);
        let a = pool.acquire().await.unwrap();
        let a_id = *a;
        drop(a);

        let again = pool.acquire().await.unwrap();
        assert_eq!(*again, a_id);
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_destroy_frees_slot_for_new_resource() {
        let pool = pool(1);
        let first = pool.acquire().await.unwrap();
        let first_id = *first;

        pool.destroy(first).await;
        let second = pool.acquire().await.unwrap();
        assert_ne!(*second, first_id);

        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.destroyed, 1);
    }

    #[tokio::test]
    async fn test_destroy_hands_slot_to_waiter() {
        let pool = pool(1);
        let first = pool.acquire().await.unwrap();

        let contender = {
            let pool = pool.clone();
            tokio::spawn(async move { *pool.acquire().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first_id = *first;
        first.destroy().await;
        assert_ne!(contender.await.unwrap(), first_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout() {
        let pool = ResourcePool::new(
            PoolConfig::new()
                .with_max_pool_size(1)
                .with_acquire_timeout(Duration::from_millis(100)),
            SeqFactory::default(),
        );
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(
            err,
            stowage_core::StowageError::from(PoolError::AcquireTimeout {
                waited: Duration::from_millis(100)
            })
        );
        assert_eq!(pool.stats().waiting, 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_swallow_resource() {
        let pool = pool(1);
        let first = pool.acquire().await.unwrap();

        let abandoned = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _ = pool.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        abandoned.abort();
        let _ = abandoned.await;

        drop(first);
        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.borrowed, 0);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_creation_failure_frees_the_slot() {
        let factory = SeqFactory::default();
        factory.fail_next.store(true, Ordering::SeqCst);
        let pool = ResourcePool::new(PoolConfig::new().with_max_pool_size(1), factory);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            stowage_core::StowageError::Pool(PoolError::CreationFailed { .. })
        ));
        assert_eq!(pool.stats().borrowed, 0);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_destroys_only_available() {
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let pool = ResourcePool::new(
            PoolConfig::new().with_max_pool_size(3),
            SeqFactory {
                destroyed: Arc::clone(&destroyed),
                ..Default::default()
            },
        );

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let kept = pool.acquire().await.unwrap();
        drop(a);
        drop(b);

        assert_eq!(pool.clear().await, 2);
        let mut gone = destroyed.lock().unwrap().clone();
        gone.sort_unstable();
        assert_eq!(gone, vec![0, 1]);

        let stats = pool.stats();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.borrowed, 1);
        drop(kept);
        assert_eq!(pool.stats().available, 1);
    }
}
