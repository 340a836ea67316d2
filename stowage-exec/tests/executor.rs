//! End-to-end executor behavior with shared probes and mock factories.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stowage_exec::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, PoolConfig,
    ResourcePool, TaskError, TaskQueue, TaskQueueConfig, TaskStatus,
};
use stowage_test_utils::{init_test_tracing, ConcurrencyProbe, CountingFactory};

#[tokio::test(start_paused = true)]
async fn queue_peak_concurrency_is_bounded() {
    init_test_tracing();
    let queue = TaskQueue::new(TaskQueueConfig::new().with_max_concurrent(2));
    let probe = ConcurrencyProbe::new();

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let probe = probe.clone();
            queue
                .enqueue(
                    format!("job-{i}"),
                    move || {
                        let probe = probe.clone();
                        async move {
                            let _inside = probe.enter();
                            tokio::time::sleep(Duration::from_millis(25)).await;
                            Ok::<_, String>(())
                        }
                    },
                    0,
                )
                .unwrap()
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(probe.peak(), 2);
    for i in 0..5 {
        assert_eq!(queue.get_status(&format!("job-{i}")), TaskStatus::Completed);
    }
}

#[tokio::test(start_paused = true)]
async fn failing_task_does_not_disturb_siblings() {
    let queue = TaskQueue::new(
        TaskQueueConfig::new()
            .with_max_concurrent(2)
            .with_retry_attempts(2)
            .with_retry_delay(Duration::from_millis(50)),
    );
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&attempts);
    let bad = queue
        .enqueue(
            "bad",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>("unreachable host".to_string()) }
            },
            0,
        )
        .unwrap();
    let good = queue
        .enqueue("good", || async { Ok::<_, String>(1u32) }, 0)
        .unwrap();

    assert_eq!(good.await, Ok(1));
    assert!(matches!(bad.await, Err(TaskError::Failed { attempts: 3, .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(queue.get_status("bad"), TaskStatus::Failed);
    assert_eq!(queue.get_status("good"), TaskStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn breaker_guards_a_pooled_dependency() {
    let factory = CountingFactory::new();
    let counters = factory.counters();
    let pool = ResourcePool::new(PoolConfig::new().with_max_pool_size(1), factory);
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new()
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_secs(5)),
    );

    for _ in 0..2 {
        let result = breaker
            .execute(|| async {
                let conn = pool.acquire().await.map_err(|e| e.to_string())?;
                conn.destroy().await;
                Err::<(), _>("connection reset".to_string())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Operation(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_secs(6)).await;
    let id = breaker
        .execute(|| async {
            let conn = pool.acquire().await.map_err(|e| e.to_string())?;
            Ok::<_, String>(*conn)
        })
        .await
        .unwrap();
    assert_eq!(id, 2);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(pool.stats().available, 1);
}

#[tokio::test]
async fn pool_creation_failure_reaches_the_acquirer() {
    let factory = CountingFactory::new();
    factory.fail_creates(true);
    let pool = ResourcePool::new(PoolConfig::new().with_max_pool_size(1), factory.clone());

    assert!(pool.acquire().await.is_err());
    factory.fail_creates(false);
    assert_eq!(*pool.acquire().await.unwrap(), 0);
    assert_eq!(factory.counters().failures.load(Ordering::SeqCst), 1);
}
