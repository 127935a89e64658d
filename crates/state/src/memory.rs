//! In-memory reference backend.
//!
//! Data lives for the life of the process only. Useful as the default
//! store for tests and for deployments that accept best-effort durability.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::store::{AgentStore, StateValue};

/// A process-local [`AgentStore`] backed by a hash map.
///
/// `write_if_unchanged` holds the write guard across the compare and the
/// insert, which is what makes the check-and-set atomic per key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StateValue>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn read(&self, key: &str) -> StoreResult<Option<StateValue>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn write_if_unchanged(
        &self,
        key: &str,
        new_value: StateValue,
        expected: Option<&StateValue>,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key) == expected {
            entries.insert(key.to_string(), new_value);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn put(&self, key: &str, value: StateValue) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<Option<StateValue>> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key))
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.clear();
        Ok(())
    }
}
