//! Property tests: random workloads against a simple reference model.

use std::collections::HashMap;

use proptest::prelude::*;
use stowage_cache::MemoryCache;
use stowage_test_utils::generators::{arb_cache_config, arb_cache_ops, CacheOp};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Whatever the policy, the cache never exceeds capacity and never
    /// returns a value other than the last one written for a key.
    #[test]
    fn prop_cache_agrees_with_model(config in arb_cache_config(), ops in arb_cache_ops(64)) {
        let max_size = config.max_size;
        let cache: MemoryCache<u32> = MemoryCache::new(config);
        let mut written: HashMap<String, u32> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Set(key, value) => {
                    cache.set(&key, value);
                    written.insert(key, value);
                }
                CacheOp::Get(key) => {
                    if let Some(value) = cache.get(&key) {
                        prop_assert_eq!(written.get(&key), Some(&value));
                    }
                }
                CacheOp::Delete(key) => {
                    cache.delete(&key);
                    written.remove(&key);
                }
            }
            prop_assert!(cache.len() <= max_size);
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.entry_count as usize, cache.len());
    }
}
