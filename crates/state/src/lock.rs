//! Named, time-bounded mutual exclusion over durable shared state.
//!
//! Unlike an in-process mutex, a [`TemporalLock`] lives in an
//! [`AgentStore`], so every holder self-expires and concurrent lockers on
//! different tasks (or processes sharing a backend) serialize through the
//! compare-and-swap discipline rather than a memory fence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use crate::error::StoreResult;
use crate::store::{self, AgentStore};

/// Configuration for a lock table.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Store key holding the semaphore table.
    pub table_key: String,
    /// Sleep step for blocking acquisition, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            table_key: "_semaphores".to_string(),
            poll_interval_ms: 10,
        }
    }
}

/// A table of named, expiring semaphores backed by an [`AgentStore`].
///
/// The whole table is one stored value, a map of semaphore id to expiry
/// timestamp in epoch milliseconds. Every write funnels through the CAS
/// retry loop, so concurrent lockers never install conflicting expiries:
/// at most one of them installs an unexpired value for a given check
/// window.
pub struct TemporalLock {
    store: Arc<dyn AgentStore>,
    config: LockConfig,
}

impl TemporalLock {
    /// Create a lock table with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self::with_config(store, LockConfig::default())
    }

    /// Create a lock table with custom configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn AgentStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    /// Milliseconds until the semaphore expires.
    ///
    /// Negative when already expired; `-1` when the semaphore was never
    /// installed.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or the table is malformed.
    pub async fn millis_remaining(&self, semaphore_id: &str) -> StoreResult<i64> {
        let table: Option<HashMap<String, i64>> =
            store::read_as(self.store.as_ref(), &self.config.table_key).await?;
        let expiry = table.and_then(|t| t.get(semaphore_id).copied());
        Ok(match expiry {
            Some(expiry_ms) => expiry_ms.saturating_sub(Utc::now().timestamp_millis()),
            None => -1,
        })
    }

    /// Check whether the semaphore is held and not yet expired.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or the table is malformed.
    pub async fn is_locked(&self, semaphore_id: &str) -> StoreResult<bool> {
        Ok(self.millis_remaining(semaphore_id).await? > 0)
    }

    /// Acquire the semaphore for `duration_ms` milliseconds.
    ///
    /// When the semaphore is still held and `block` is false, returns
    /// `Ok(false)` immediately. When `block` is true, sleeps in steps of
    /// at most the configured poll interval, re-reading the remaining time
    /// each step, until the hold expires or is released. Once eligible,
    /// installs `now + duration_ms` through the CAS loop and returns
    /// `Ok(true)`.
    ///
    /// A `duration_ms <= 0` installs an already-expired record, which acts
    /// as a release.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or the table is malformed.
    pub async fn lock(&self, semaphore_id: &str, duration_ms: i64, block: bool) -> StoreResult<bool> {
        let mut remaining = self.millis_remaining(semaphore_id).await?;
        if block {
            while remaining > 0 {
                let step = remaining.min(self.config.poll_interval_ms.min(i64::MAX as u64) as i64);
                tokio::time::sleep(Duration::from_millis(step.max(1) as u64)).await;
                remaining = self.millis_remaining(semaphore_id).await?;
            }
        } else if remaining > 0 {
            return Ok(false);
        }
        self.install(semaphore_id, duration_ms).await?;
        Ok(true)
    }

    /// Release the semaphore.
    ///
    /// Equivalent to a non-blocking lock with a non-positive duration.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or the table is malformed.
    pub async fn unlock(&self, semaphore_id: &str) -> StoreResult<()> {
        self.install(semaphore_id, -1).await
    }

    /// Install an expiry for `semaphore_id` through the CAS retry loop.
    async fn install(&self, semaphore_id: &str, duration_ms: i64) -> StoreResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let expiry_ms = if duration_ms <= 0 {
            0
        } else {
            now_ms.saturating_add(duration_ms)
        };
        store::update(self.store.as_ref(), &self.config.table_key, |old| {
            let mut table: HashMap<String, i64> = match old {
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|err| crate::error::StoreError::malformed(
                        &self.config.table_key,
                        err.to_string(),
                    ))?,
                None => HashMap::new(),
            };
            table.insert(semaphore_id.to_string(), expiry_ms);
            Ok(serde_json::to_value(table)?)
        })
        .await?;
        tracing::debug!(
            semaphore_id = %semaphore_id,
            expiry_ms = %expiry_ms,
            "installed semaphore expiry"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn lock_table() -> TemporalLock {
        TemporalLock::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_unheld_semaphore_reports_never_set() {
        let lock = lock_table();
        assert_eq!(lock.millis_remaining("job").await.ok(), Some(-1));
        assert_eq!(lock.is_locked("job").await.ok(), Some(false));
    }

    #[tokio::test]
    async fn test_nonblocking_lock_on_free_semaphore() {
        let lock = lock_table();
        assert_eq!(lock.lock("job", 100, false).await.ok(), Some(true));
        assert_eq!(lock.is_locked("job").await.ok(), Some(true));
    }

    #[tokio::test]
    async fn test_nonblocking_lock_on_held_semaphore_fails() {
        let lock = lock_table();
        let _ = lock.lock("job", 200, false).await;
        assert_eq!(lock.lock("job", 200, false).await.ok(), Some(false));
    }

    #[tokio::test]
    async fn test_lock_reacquirable_after_expiry() {
        let lock = lock_table();
        let _ = lock.lock("job", 30, false).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(lock.lock("job", 100, false).await.ok(), Some(true));
    }

    #[tokio::test]
    async fn test_unlock_releases_immediately() {
        let lock = lock_table();
        let _ = lock.lock("job", 10_000, false).await;
        assert_eq!(lock.is_locked("job").await.ok(), Some(true));

        let _ = lock.unlock("job").await;
        assert_eq!(lock.is_locked("job").await.ok(), Some(false));
        assert_eq!(lock.lock("job", 100, false).await.ok(), Some(true));
    }

    #[tokio::test]
    async fn test_nonpositive_duration_installs_expired_record() {
        let lock = lock_table();
        assert_eq!(lock.lock("job", 0, false).await.ok(), Some(true));
        // The record exists but is already expired.
        assert_eq!(lock.is_locked("job").await.ok(), Some(false));
        let remaining = lock.millis_remaining("job").await.unwrap_or(0);
        assert!(remaining < -1, "expired record reads as deeply negative, not never-set");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_lock_waits_for_expiry() {
        let lock = lock_table();
        let _ = lock.lock("job", 60, false).await;

        let started = std::time::Instant::now();
        let acquired = lock.lock("job", 100, true).await;
        assert_eq!(acquired.ok(), Some(true));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_lock_observes_concurrent_unlock() {
        let store: Arc<dyn AgentStore> = Arc::new(MemoryStore::new());
        let lock = TemporalLock::new(Arc::clone(&store));
        let _ = lock.lock("job", 5_000, false).await;

        let unlocker_store = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let lock = TemporalLock::new(unlocker_store);
            let _ = lock.unlock("job").await;
        });

        let started = std::time::Instant::now();
        let acquired = lock.lock("job", 100, true).await;
        assert_eq!(acquired.ok(), Some(true));
        // Resolved within a poll interval of the unlock, far before expiry.
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }
}
