//! Durable per-agent key/value storage and the compare-and-swap update
//! discipline.
//!
//! Any backend (in-memory, file-based, remote datastore) can sit behind
//! [`AgentStore`] as long as `write_if_unchanged` is atomic per key. Every
//! key that more than one writer can touch is mutated exclusively through
//! [`update`], which retries from a fresh snapshot on contention.

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

/// Stored value type. Values are compared by full structural equality, not
/// by a version counter.
pub type StateValue = serde_json::Value;

/// Durable key/value storage for a single agent.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn read(&self, key: &str) -> StoreResult<Option<StateValue>>;

    /// Atomically store `new_value` under `key` if and only if the current
    /// value equals `expected` (`None` meaning the key must be absent).
    ///
    /// Returns `true` when the write was applied; `false` leaves the store
    /// untouched. This is the sole sanctioned mutation path for any key
    /// written by more than one logical writer.
    ///
    /// # Errors
    ///
    /// Returns an error only when the backend itself fails; a failed
    /// comparison is the `Ok(false)` outcome, not an error.
    async fn write_if_unchanged(
        &self,
        key: &str,
        new_value: StateValue,
        expected: Option<&StateValue>,
    ) -> StoreResult<bool>;

    /// Unconditionally store `value` under `key`.
    ///
    /// Only valid for keys with a single logical writer; contended keys go
    /// through `write_if_unchanged`.
    async fn put(&self, key: &str, value: StateValue) -> StoreResult<()>;

    /// Remove the value under `key`, returning it if it was present.
    async fn remove(&self, key: &str) -> StoreResult<Option<StateValue>>;

    /// All keys currently present.
    async fn keys(&self) -> StoreResult<Vec<String>>;

    /// Drop every entry.
    async fn clear(&self) -> StoreResult<()>;
}

/// Read-compute-CAS retry loop over a single key.
///
/// `compute` receives the current snapshot (or `None` when the key is
/// absent) and produces the replacement value. On a lost race the loop
/// re-reads and recomputes; retries are unbounded, with a cooperative
/// yield between attempts so contending tasks make progress.
///
/// Returns the value that was successfully installed.
///
/// # Errors
///
/// Propagates backend errors and any error from `compute`; CAS conflicts
/// themselves never escape the loop.
pub async fn update<F>(store: &dyn AgentStore, key: &str, mut compute: F) -> StoreResult<StateValue>
where
    F: FnMut(Option<&StateValue>) -> StoreResult<StateValue> + Send,
{
    loop {
        let current = store.read(key).await?;
        let next = compute(current.as_ref())?;
        if store
            .write_if_unchanged(key, next.clone(), current.as_ref())
            .await?
        {
            return Ok(next);
        }
        tracing::trace!(key = %key, "contended write, retrying from fresh snapshot");
        tokio::task::yield_now().await;
    }
}

/// Decode the value under `key` into `T`, treating an absent key as `None`.
///
/// # Errors
///
/// Returns [`StoreError::Malformed`] when the stored value does not decode.
pub async fn read_as<T>(store: &dyn AgentStore, key: &str) -> StoreResult<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    match store.read(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|err| StoreError::malformed(key, err.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_update_installs_over_absent_key() {
        let store = MemoryStore::new();

        let installed = update(&store, "counter", |old| {
            let current = old.and_then(StateValue::as_i64).unwrap_or(0);
            Ok(StateValue::from(current + 1))
        })
        .await;

        assert!(installed.is_ok());
        let stored = store.read("counter").await.ok().flatten();
        assert_eq!(stored, Some(StateValue::from(1)));
    }

    #[tokio::test]
    async fn test_update_sees_previous_value() {
        let store = MemoryStore::new();
        let _ = store.put("counter", StateValue::from(41)).await;

        let installed = update(&store, "counter", |old| {
            let current = old.and_then(StateValue::as_i64).unwrap_or(0);
            Ok(StateValue::from(current + 1))
        })
        .await;

        assert_eq!(installed.ok(), Some(StateValue::from(42)));
    }

    #[tokio::test]
    async fn test_read_as_decodes_typed_value() {
        let store = MemoryStore::new();
        let _ = store.put("name", StateValue::from("hermod")).await;

        let value: Option<String> = read_as(&store, "name").await.unwrap_or(None);
        assert_eq!(value.as_deref(), Some("hermod"));
    }

    #[tokio::test]
    async fn test_read_as_flags_malformed_value() {
        let store = MemoryStore::new();
        let _ = store.put("count", StateValue::from("not a number")).await;

        let result: StoreResult<Option<u64>> = read_as(&store, "count").await;
        assert!(matches!(result, Err(StoreError::Malformed { .. })));
    }
}
