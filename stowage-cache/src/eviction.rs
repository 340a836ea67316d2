//! Victim selection for each eviction policy.

use std::collections::HashMap;
use std::time::Duration;

use stowage_core::EvictionPolicy;
use tokio::time::Instant;

use crate::entry::CacheEntry;

/// Pick the key to evict under `policy`, or `None` for an empty map.
///
/// - LRU: least recently touched.
/// - LFU: fewest reads, least recently touched among equals.
/// - FIFO: inserted first.
/// - TTL: the earliest-inserted entry already past its ttl. When nothing has
///   expired yet, falls back to the earliest-inserted entry so the capacity
///   bound still holds.
pub(crate) fn select_victim<V>(
    policy: EvictionPolicy,
    entries: &HashMap<String, CacheEntry<V>>,
    ttl: Duration,
    now: Instant,
) -> Option<String> {
    let victim = match policy {
        EvictionPolicy::Lru => entries.iter().min_by_key(|(_, e)| e.accessed_seq),
        EvictionPolicy::Lfu => entries
            .iter()
            .min_by_key(|(_, e)| (e.access_count(), e.accessed_seq)),
        EvictionPolicy::Fifo => entries.iter().min_by_key(|(_, e)| e.inserted_seq),
        EvictionPolicy::Ttl => entries
            .iter()
            .filter(|(_, e)| e.is_expired(ttl, now))
            .min_by_key(|(_, e)| e.inserted_seq)
            .or_else(|| entries.iter().min_by_key(|(_, e)| e.inserted_seq)),
    };

    victim.map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryStore;
    use proptest::prelude::*;
    use stowage_core::CacheConfig;

    fn filled(policy: EvictionPolicy, ttl: Duration) -> (EntryStore<u32>, Instant) {
        let mut store = EntryStore::new(
            &CacheConfig::new()
                .with_max_size(3)
                .with_ttl(ttl)
                .with_eviction_policy(policy),
        );
        let now = Instant::now();
        store.insert("a".to_string(), 1, now);
        store.insert("b".to_string(), 2, now + Duration::from_secs(1));
        store.insert("c".to_string(), 3, now + Duration::from_secs(2));
        (store, now)
    }

    fn sorted_keys(store: &EntryStore<u32>) -> Vec<String> {
        let mut keys = store.keys();
        keys.sort();
        keys
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let (mut store, now) = filled(EvictionPolicy::Lru, Duration::ZERO);
        store.lookup("a", now);
        store.insert("d".to_string(), 4, now);
        assert_eq!(sorted_keys(&store), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_lfu_evicts_least_frequently_read() {
        let (mut store, now) = filled(EvictionPolicy::Lfu, Duration::ZERO);
        store.lookup("a", now);
        store.lookup("a", now);
        store.lookup("b", now);
        store.insert("d".to_string(), 4, now);
        assert_eq!(sorted_keys(&store), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_lfu_breaks_ties_by_recency() {
        let (mut store, now) = filled(EvictionPolicy::Lfu, Duration::ZERO);
        store.lookup("c", now);
        store.lookup("b", now);
        store.lookup("a", now);
        // All read once; "c" was touched longest ago.
        store.insert("d".to_string(), 4, now);
        assert_eq!(sorted_keys(&store), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_fifo_ignores_reads() {
        let (mut store, now) = filled(EvictionPolicy::Fifo, Duration::ZERO);
        store.lookup("a", now);
        store.insert("d".to_string(), 4, now);
        assert_eq!(sorted_keys(&store), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_ttl_prefers_expired_entry() {
        let (mut store, now) = filled(EvictionPolicy::Ttl, Duration::from_secs(10));
        // At +10.5s only "a" (written at +0) is past its ttl.
        let later = now + Duration::from_millis(10_500);
        store.insert("d".to_string(), 4, later);
        assert_eq!(sorted_keys(&store), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_ttl_falls_back_to_oldest_when_nothing_expired() {
        let (mut store, now) = filled(EvictionPolicy::Ttl, Duration::from_secs(60));
        store.lookup("a", now);
        store.insert("d".to_string(), 4, now + Duration::from_secs(3));
        assert_eq!(store.len(), 3);
        assert_eq!(sorted_keys(&store), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_empty_map_has_no_victim() {
        let entries: HashMap<String, CacheEntry<u32>> = HashMap::new();
        for policy in [
            EvictionPolicy::Lru,
            EvictionPolicy::Lfu,
            EvictionPolicy::Fifo,
            EvictionPolicy::Ttl,
        ] {
            assert!(select_victim(policy, &entries, Duration::ZERO, Instant::now()).is_none());
        }
    }

    fn policy_strategy() -> impl Strategy<Value = EvictionPolicy> {
        prop_oneof![
            Just(EvictionPolicy::Lru),
            Just(EvictionPolicy::Lfu),
            Just(EvictionPolicy::Fifo),
            Just(EvictionPolicy::Ttl),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: a store never holds more than max_size entries, whatever
        /// the policy and the mix of reads and writes.
        #[test]
        fn prop_capacity_is_never_exceeded(
            policy in policy_strategy(),
            max_size in 1usize..8,
            ops in prop::collection::vec((0u8..16, any::<bool>()), 1..64),
        ) {
            let mut store = EntryStore::new(
                &CacheConfig::new()
                    .with_max_size(max_size)
                    .with_ttl(Duration::from_secs(30))
                    .with_eviction_policy(policy),
            );
            let now = Instant::now();
            for (key, is_write) in ops {
                let key = format!("k{key}");
                if is_write {
                    store.insert(key, 0, now);
                } else {
                    store.lookup(&key, now);
                }
                prop_assert!(store.len() <= max_size);
            }
        }

        /// Property: LRU always evicts the key whose last touch is oldest,
        /// checked against a recency list model.
        #[test]
        fn prop_lru_matches_recency_model(
            ops in prop::collection::vec((0u8..6, any::<bool>()), 1..48),
        ) {
            let max_size = 3;
            let mut store = EntryStore::new(
                &CacheConfig::new()
                    .with_max_size(max_size)
                    .without_ttl()
                    .with_eviction_policy(EvictionPolicy::Lru),
            );
            let mut model: Vec<String> = Vec::new();
            let now = Instant::now();

            for (key, is_write) in ops {
                let key = format!("k{key}");
                if is_write {
                    store.insert(key.clone(), 0, now);
                    model.retain(|k| k != &key);
                    if model.len() >= max_size {
                        model.remove(0);
                    }
                    model.push(key);
                } else if store.lookup(&key, now).is_some() {
                    model.retain(|k| k != &key);
                    model.push(key);
                }
            }

            let mut expected = model.clone();
            expected.sort();
            let mut actual = store.keys();
            actual.sort();
            prop_assert_eq!(actual, expected);
        }
    }
}
