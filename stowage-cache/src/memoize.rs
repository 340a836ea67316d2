//! Function memoization over a [`MemoryCache`].

use std::marker::PhantomData;

use crate::memory::MemoryCache;

/// A function whose results are cached by a caller-derived key.
///
/// Built with [`MemoryCache::memoize`]. Errors returned by the wrapped
/// function pass through unchanged and are not cached.
pub struct Memoized<A: ?Sized, V, F, K> {
    cache: MemoryCache<V>,
    func: F,
    key_fn: K,
    _arg: PhantomData<fn(&A)>,
}

impl<A, V, F, K> Memoized<A, V, F, K>
where
    A: ?Sized,
    V: Clone + Send + 'static,
    K: Fn(&A) -> String,
{
    pub(crate) fn new(cache: MemoryCache<V>, func: F, key_fn: K) -> Self {
        Self {
            cache,
            func,
            key_fn,
            _arg: PhantomData,
        }
    }

    /// Call the wrapped function, or return the cached result for `arg`.
    pub fn call<E>(&self, arg: &A) -> Result<V, E>
    where
        F: Fn(&A) -> Result<V, E>,
    {
        let key = (self.key_fn)(arg);
        self.cache.get_or_insert_with(&key, || (self.func)(arg))
    }

    /// Drop the cached result for `arg`.
    pub fn forget(&self, arg: &A) -> bool {
        self.cache.delete(&(self.key_fn)(arg))
    }

    /// The cache holding memoized results.
    pub fn cache(&self) -> &MemoryCache<V> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use stowage_core::CacheConfig;

    #[test]
    fn test_memoize_caches_by_derived_key() {
        let cache: MemoryCache<u64> = MemoryCache::new(CacheConfig::new().without_ttl());
        let calls = Cell::new(0);

        let square = cache.memoize(
            |n: &u64| {
                calls.set(calls.get() + 1);
                Ok::<_, String>(n * n)
            },
            |n: &u64| format!("square:{n}"),
        );

        assert_eq!(square.call(&4), Ok(16));
        assert_eq!(square.call(&4), Ok(16));
        assert_eq!(square.call(&5), Ok(25));
        assert_eq!(calls.get(), 2);
        assert!(cache.has("square:4"));
    }

    #[test]
    fn test_memoize_passes_errors_through_uncached() {
        let cache: MemoryCache<String> = MemoryCache::new(CacheConfig::new().without_ttl());
        let attempts = Cell::new(0);

        let lookup = cache.memoize(
            |name: &str| {
                attempts.set(attempts.get() + 1);
                if attempts.get() == 1 {
                    Err(format!("{name} unavailable"))
                } else {
                    Ok(name.to_uppercase())
                }
            },
            |name: &str| name.to_string(),
        );

        assert_eq!(lookup.call("ada"), Err("ada unavailable".to_string()));
        assert_eq!(lookup.call("ada"), Ok("ADA".to_string()));
        assert_eq!(lookup.call("ada"), Ok("ADA".to_string()));
        assert_eq!(attempts.get(), 2);

        assert!(lookup.forget("ada"));
        assert!(!lookup.cache().has("ada"));
    }
}
