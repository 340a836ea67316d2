//! Dependency index: groups cache keys under invalidation topics.
//!
//! The index only remembers key strings. It never owns entries, and a key
//! deleted from the cache by other means simply becomes a no-op when its
//! topic is later invalidated.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use stowage_core::CacheError;

/// Characters that would turn a topic into a pattern.
const PATTERN_CHARS: [char; 3] = ['*', '?', '['];

/// Topic → registered cache keys.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    topics: Mutex<HashMap<String, HashSet<String>>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject topics that look like wildcard patterns. Pattern invalidation
    /// is unsupported, and silently treating `user:*` as a literal would
    /// leave the caller believing a group had been invalidated.
    pub fn check_topic(topic: &str) -> Result<(), CacheError> {
        if topic.contains(PATTERN_CHARS) {
            return Err(CacheError::PatternInvalidationUnsupported {
                pattern: topic.to_string(),
            });
        }
        Ok(())
    }

    /// Register `key` under `topic`.
    pub fn add(&self, key: impl Into<String>, topic: &str) -> Result<(), CacheError> {
        Self::check_topic(topic)?;
        self.lock()
            .entry(topic.to_string())
            .or_default()
            .insert(key.into());
        Ok(())
    }

    /// Remove `topic` and return the keys that were registered under it.
    /// The registration is one-shot: keys must be re-added to be invalidated
    /// again.
    pub fn take(&self, topic: &str) -> Result<HashSet<String>, CacheError> {
        Self::check_topic(topic)?;
        Ok(self.lock().remove(topic).unwrap_or_default())
    }

    /// Keys currently registered under `topic`.
    pub fn keys_for(&self, topic: &str) -> Vec<String> {
        self.lock()
            .get(topic)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Topics with at least one registration.
    pub fn topics(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_is_one_shot() {
        let index = DependencyIndex::new();
        index.add("user:1", "users").unwrap();
        index.add("user:2", "users").unwrap();

        let keys = index.take("users").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("user:1"));
        assert!(index.take("users").unwrap().is_empty());
        assert!(index.topics().is_empty());
    }

    #[test]
    fn test_key_may_belong_to_many_topics() {
        let index = DependencyIndex::new();
        index.add("order:9", "orders").unwrap();
        index.add("order:9", "user:1").unwrap();

        index.take("orders").unwrap();
        assert_eq!(index.keys_for("user:1"), vec!["order:9".to_string()]);
    }

    #[test]
    fn test_patterns_are_rejected() {
        let index = DependencyIndex::new();
        assert!(matches!(
            index.add("k", "user:*"),
            Err(CacheError::PatternInvalidationUnsupported { .. })
        ));
        assert!(matches!(
            index.take("user:?"),
            Err(CacheError::PatternInvalidationUnsupported { .. })
        ));
    }
}
