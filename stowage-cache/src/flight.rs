//! Single-flight coordination: at most one factory per key runs at a time.
//!
//! Callers take a per-key permit before running a factory. Everyone else
//! asking for the same key queues on the permit and, once it is released,
//! re-checks the cache before deciding whether to run their own factory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    slots: Mutex<Slots>,
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive use of `key`.
    ///
    /// Cancelling the wait still removes the key's slot if nobody else is
    /// using it.
    pub(crate) async fn acquire(&self, key: &str) -> FlightPermit<'_> {
        let cleanup = SlotCleanup {
            flight: self,
            key: key.to_string(),
        };
        let slot = Arc::clone(self.lock().entry(key.to_string()).or_default());
        let guard = slot.lock_owned().await;
        FlightPermit {
            _guard: guard,
            _cleanup: cleanup,
        }
    }

    /// Number of keys with a holder or waiters.
    pub(crate) fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

/// Removes a key's slot once only the map still references it.
///
/// Declared before anything that clones the slot, so it drops last.
struct SlotCleanup<'a> {
    flight: &'a SingleFlight,
    key: String,
}

impl Drop for SlotCleanup<'_> {
    fn drop(&mut self) {
        let mut slots = self.flight.lock();
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

/// Exclusive right to fill one key. Dropping it wakes the next waiter.
pub(crate) struct FlightPermit<'a> {
    // Field order matters: the guard releases its slot reference first.
    _guard: OwnedMutexGuard<()>,
    _cleanup: SlotCleanup<'a>,
}
