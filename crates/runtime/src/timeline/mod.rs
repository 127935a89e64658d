//! Shared schedule timeline.
//!
//! One due-ordered structure holds every pending trigger in the process;
//! the coordinator keeps exactly one wake timer armed, always for the
//! earliest due entry, and hands due actions to a bounded dispatch pool.
//! Armed this way, a thousand idle agents cost one sleeping task, not a
//! thousand timers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, trace, warn};

/// Identifies the single pending trigger an owner may hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerKey(String);

impl TriggerKey {
    /// Create a trigger key from an existing string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Create a namespaced key, keeping distinct owners collision-free.
    #[must_use]
    pub fn scoped(namespace: &str, id: &str) -> Self {
        Self(format!("{namespace}/{id}"))
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The action executed when a trigger comes due.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// Run the action. Executed on the dispatch pool, never under the
    /// timeline's structural lock.
    async fn fire(&self);
}

/// Configuration for the timeline.
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineConfig {
    /// Number of concurrent workers executing due actions.
    pub dispatch_workers: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            dispatch_workers: 4,
        }
    }
}

/// Global ordering: by due time, ties broken by key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    due: DateTime<Utc>,
    key: TriggerKey,
}

struct TimelineInner {
    by_due: BTreeMap<Slot, Arc<dyn TriggerHandler>>,
    by_key: HashMap<TriggerKey, DateTime<Utc>>,
    wake: Option<tokio::task::AbortHandle>,
    accepting: bool,
}

/// The shared trigger coordinator.
///
/// Guarantees: an entry fires no earlier than its due time; replacing an
/// entry only ever moves it earlier; a cancel (or a successful competing
/// removal) before dispatch strictly prevents the fire. An action already
/// handed to the pool when its cancel arrives still runs; that race is
/// benign by contract.
pub struct ScheduleTimeline {
    inner: Mutex<TimelineInner>,
    pool: Arc<Semaphore>,
    this: Weak<Self>,
}

impl ScheduleTimeline {
    /// Create a timeline with default configuration.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_config(TimelineConfig::default())
    }

    /// Create a timeline with custom configuration.
    #[must_use]
    pub fn with_config(config: TimelineConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            inner: Mutex::new(TimelineInner {
                by_due: BTreeMap::new(),
                by_key: HashMap::new(),
                wake: None,
                accepting: true,
            }),
            pool: Arc::new(Semaphore::new(config.dispatch_workers.max(1))),
            this: this.clone(),
        })
    }

    /// Insert or tighten the pending trigger for `key`.
    ///
    /// Earliest wins: a request with a later-or-equal due time than the
    /// stored entry is ignored; an earlier one replaces it and the wake
    /// schedule is re-evaluated immediately, since an already-armed wake
    /// might fire too late for the new due time.
    pub async fn request_trigger(
        &self,
        key: TriggerKey,
        due: DateTime<Utc>,
        handler: Arc<dyn TriggerHandler>,
    ) {
        let mut inner = self.inner.lock().await;
        if !inner.accepting {
            warn!(key = %key, "timeline is shut down, dropping trigger request");
            return;
        }
        match inner.by_key.get(&key) {
            Some(existing) if *existing <= due => {
                trace!(key = %key, "keeping earlier trigger");
                return;
            }
            Some(existing) => {
                let stale = Slot {
                    due: *existing,
                    key: key.clone(),
                };
                inner.by_due.remove(&stale);
            }
            None => {}
        }
        inner.by_due.insert(
            Slot {
                due,
                key: key.clone(),
            },
            handler,
        );
        inner.by_key.insert(key, due);
        self.evaluate_locked(&mut inner);
    }

    /// Remove the pending trigger for `key`, if any.
    pub async fn cancel(&self, key: &TriggerKey) {
        let mut inner = self.inner.lock().await;
        if let Some(due) = inner.by_key.remove(key) {
            let slot = Slot {
                due,
                key: key.clone(),
            };
            inner.by_due.remove(&slot);
            debug!(key = %key, "cancelled trigger");
        }
        // A wake armed for the removed entry fires into an empty slot and
        // simply re-arms for whatever is next.
    }

    /// Dispatch everything due and re-arm the wake timer.
    pub async fn evaluate(&self) {
        let mut inner = self.inner.lock().await;
        self.evaluate_locked(&mut inner);
    }

    /// Stop accepting triggers, drop all entries, and cancel the wake.
    ///
    /// Actions already handed to the pool may still run; nothing else
    /// fires after this returns.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.accepting = false;
        inner.by_due.clear();
        inner.by_key.clear();
        if let Some(wake) = inner.wake.take() {
            wake.abort();
        }
        self.pool.close();
        debug!("timeline shut down");
    }

    /// Number of pending triggers.
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.by_key.len()
    }

    /// Due time of the pending trigger for `key`, if any.
    pub async fn next_due(&self, key: &TriggerKey) -> Option<DateTime<Utc>> {
        self.inner.lock().await.by_key.get(key).copied()
    }

    /// Pop and dispatch every due entry, then arm exactly one wake for the
    /// next earliest due time. Holds the structural lock for bookkeeping
    /// only; actions run on the pool.
    fn evaluate_locked(&self, inner: &mut TimelineInner) {
        loop {
            let now = Utc::now();
            let Some((slot, _)) = inner.by_due.first_key_value() else {
                if let Some(wake) = inner.wake.take() {
                    wake.abort();
                }
                return;
            };
            if slot.due <= now {
                if let Some((slot, handler)) = inner.by_due.pop_first() {
                    inner.by_key.remove(&slot.key);
                    trace!(key = %slot.key, "dispatching due trigger");
                    self.dispatch(handler);
                }
                continue;
            }

            // Arm one wake for the earliest future entry, replacing any
            // previously armed one.
            let due = slot.due;
            if let Some(wake) = inner.wake.take() {
                wake.abort();
            }
            let timeline = self.this.clone();
            let handle = tokio::spawn(async move {
                let wait = due
                    .signed_duration_since(Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                if let Some(timeline) = timeline.upgrade() {
                    timeline.evaluate().await;
                }
            });
            inner.wake = Some(handle.abort_handle());
            return;
        }
    }

    /// Hand an action to the bounded pool.
    fn dispatch(&self, handler: Arc<dyn TriggerHandler>) {
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                // Pool closed during shutdown; the action is dropped.
                return;
            };
            handler.fire().await;
        });
    }
}
