//! Process-local repeat-task result cache.
//!
//! Intentionally not persisted: after a restart the cache is empty and
//! refills from live results.

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Deserialize;

/// Configuration for the result cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached results.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_capacity: 1024 }
    }
}

/// A cached result together with when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    /// The last observed result.
    pub value: serde_json::Value,
    /// When the result was stored.
    pub stored_at: DateTime<Utc>,
}

/// Last-result cache keyed by repeat-task id.
pub struct ResultCache {
    cache: Cache<String, CachedResult>,
}

impl ResultCache {
    /// Create a cache with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with custom configuration.
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            cache: Cache::builder().max_capacity(config.max_capacity).build(),
        }
    }

    /// Store the latest result for a repeat task.
    pub fn insert(&self, repeat_id: &str, value: serde_json::Value) {
        self.cache.insert(
            repeat_id.to_string(),
            CachedResult {
                value,
                stored_at: Utc::now(),
            },
        );
    }

    /// Get the latest cached result for a repeat task.
    #[must_use]
    pub fn get(&self, repeat_id: &str) -> Option<CachedResult> {
        self.cache.get(repeat_id)
    }

    /// Check whether a result is cached for a repeat task.
    #[must_use]
    pub fn contains(&self, repeat_id: &str) -> bool {
        self.cache.contains_key(repeat_id)
    }

    /// Drop the cached result for a repeat task.
    pub fn invalidate(&self, repeat_id: &str) {
        self.cache.invalidate(repeat_id);
    }

    /// Number of cached results.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_get() {
        let cache = ResultCache::new();
        cache.insert("r1", serde_json::json!({"v": 1}));

        let cached = cache.get("r1");
        assert_eq!(cached.map(|c| c.value), Some(serde_json::json!({"v": 1})));
    }

    #[test]
    fn test_insert_replaces_previous_result() {
        let cache = ResultCache::new();
        cache.insert("r1", serde_json::json!(1));
        cache.insert("r1", serde_json::json!(2));

        assert_eq!(cache.get("r1").map(|c| c.value), Some(serde_json::json!(2)));
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = ResultCache::new();
        cache.insert("r1", serde_json::json!(1));
        assert!(cache.contains("r1"));

        cache.invalidate("r1");
        assert!(cache.get("r1").is_none());
    }

    #[test]
    fn test_get_unknown_repeat_is_none() {
        let cache = ResultCache::new();
        assert!(cache.get("ghost").is_none());
    }
}
