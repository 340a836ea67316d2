//! Property test: with one worker, queued tasks run by descending priority
//! and ties keep enqueue order.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use stowage_exec::{TaskQueue, TaskQueueConfig};
use tokio::sync::Notify;

fn run_order(priorities: &[i32]) -> Vec<usize> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    runtime.block_on(async {
        let queue = TaskQueue::new(TaskQueueConfig::new().with_max_concurrent(1));
        let gate = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupies the only slot so everything below lands in the heap.
        let blocker = Arc::clone(&gate);
        let gate_handle = queue
            .enqueue(
                "gate",
                move || {
                    let blocker = Arc::clone(&blocker);
                    async move {
                        blocker.notified().await;
                        Ok::<_, String>(())
                    }
                },
                i32::MAX,
            )
            .unwrap();

        for (index, &priority) in priorities.iter().enumerate() {
            let order = Arc::clone(&order);
            queue
                .enqueue(
                    format!("task-{index}"),
                    move || {
                        let order = Arc::clone(&order);
                        async move {
                            order.lock().unwrap().push(index);
                            Ok::<_, String>(())
                        }
                    },
                    priority,
                )
                .unwrap();
        }

        gate.notify_one();
        gate_handle.await.unwrap();
        queue.wait_idle().await;

        let recorded = order.lock().unwrap().clone();
        recorded
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn dispatch_is_priority_descending_and_stable(priorities in prop::collection::vec(-3i32..3, 1..12)) {
        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        // sort_by_key is stable, so equal priorities keep enqueue order.
        expected.sort_by_key(|&index| std::cmp::Reverse(priorities[index]));

        prop_assert_eq!(run_order(&priorities), expected);
    }
}
