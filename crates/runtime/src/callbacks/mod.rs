//! Reply correlation.
//!
//! Every outbound call registers its resolution logic here under its call
//! id. The reply path and the deadline path race; whichever pulls the
//! entry first resolves the call, and the loser finds nothing. Deadlines
//! are armed on the shared [`ScheduleTimeline`] rather than a per-call
//! timer.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{CallFailure, RegistryError};
use crate::rpc::CallId;
use crate::timeline::{ScheduleTimeline, TriggerHandler, TriggerKey};

/// Resolution logic for one pending call.
///
/// Exactly one of the two methods runs, exactly once, for a call that
/// resolves. After `clear()` neither runs.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// The reply arrived.
    async fn on_success(&self, result: serde_json::Value);
    /// The call failed terminally (timeout or remote failure).
    async fn on_failure(&self, failure: CallFailure);
}

/// A registered call waiting for its resolution.
pub struct PendingCall {
    description: String,
    sink: Box<dyn ReplySink>,
}

impl PendingCall {
    /// The human-readable description given at registration.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Resolve with a result.
    pub async fn succeed(self, result: serde_json::Value) {
        self.sink.on_success(result).await;
    }

    /// Resolve with a failure.
    pub async fn fail(self, failure: CallFailure) {
        self.sink.on_failure(failure).await;
    }
}

struct RegistryState {
    entries: HashMap<CallId, PendingCall>,
    accepting: bool,
}

/// Correlates outbound call ids with their resolution logic and arms a
/// deadline per entry.
pub struct CallbackRegistry {
    state: Mutex<RegistryState>,
    timeline: Arc<ScheduleTimeline>,
    timeout: chrono::Duration,
    scope: String,
    this: Weak<Self>,
}

impl CallbackRegistry {
    /// Create a registry whose deadlines are armed on `timeline`.
    ///
    /// `scope` keeps this registry's timeline keys disjoint from other
    /// registries sharing the same timeline.
    #[must_use]
    pub fn new(scope: impl Into<String>, timeline: Arc<ScheduleTimeline>, timeout_ms: u64) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                accepting: true,
            }),
            timeline,
            timeout: chrono::Duration::milliseconds(timeout_ms.min(i64::MAX as u64) as i64),
            scope: scope.into(),
            this: this.clone(),
        })
    }

    /// Register resolution logic for `id` and arm its deadline.
    ///
    /// Arming is best-effort: if the timeline refuses the trigger (it is
    /// shutting down), the refusal is logged and the entry stays
    /// registered without a deadline, resolvable only by an explicit
    /// pull.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateId`] when a live entry already holds the
    /// id; [`RegistryError::ShutDown`] after `clear()`.
    pub async fn push(
        &self,
        id: CallId,
        description: impl Into<String>,
        sink: Box<dyn ReplySink>,
    ) -> Result<(), RegistryError> {
        let description = description.into();
        let mut state = self.state.lock().await;
        if !state.accepting {
            return Err(RegistryError::ShutDown);
        }
        if state.entries.contains_key(&id) {
            return Err(RegistryError::DuplicateId { id });
        }
        state.entries.insert(
            id.clone(),
            PendingCall {
                description: description.clone(),
                sink,
            },
        );

        // Armed while the entry lock is held so a pull cannot slip between
        // the insert and the deadline.
        let deadline = DeadlineTrigger {
            registry: self.this.clone(),
            id: id.clone(),
            description,
        };
        self.timeline
            .request_trigger(
                self.trigger_key(&id),
                Utc::now() + self.timeout,
                Arc::new(deadline),
            )
            .await;
        Ok(())
    }

    /// Atomically remove and return the entry for `id`.
    ///
    /// Returns `None` when the call is unknown or already resolved; this
    /// is the signal that the other racer won, never an error. A
    /// successful pull cancels the deadline from inside the removal.
    pub async fn pull(&self, id: &CallId) -> Option<PendingCall> {
        let mut state = self.state.lock().await;
        let call = state.entries.remove(id)?;
        self.timeline.cancel(&self.trigger_key(id)).await;
        Some(call)
    }

    /// Pull and resolve with a result. Returns whether this caller won
    /// the resolution race.
    pub async fn resolve_success(&self, id: &CallId, result: serde_json::Value) -> bool {
        match self.pull(id).await {
            Some(call) => {
                call.succeed(result).await;
                true
            }
            None => {
                debug!(id = %id, "late or duplicate reply ignored");
                false
            }
        }
    }

    /// Pull and resolve with a failure. Returns whether this caller won
    /// the resolution race.
    pub async fn resolve_failure(&self, id: &CallId, failure: CallFailure) -> bool {
        match self.pull(id).await {
            Some(call) => {
                call.fail(failure).await;
                true
            }
            None => false,
        }
    }

    /// Register an entry and return a future resolving with the outcome.
    ///
    /// # Errors
    ///
    /// Same as [`CallbackRegistry::push`].
    pub async fn push_awaitable(
        &self,
        id: CallId,
        description: impl Into<String>,
    ) -> Result<PendingReply, RegistryError> {
        let (tx, rx) = oneshot::channel();
        let sink = OneshotSink {
            tx: std::sync::Mutex::new(Some(tx)),
        };
        self.push(id, description, Box::new(sink)).await?;
        Ok(PendingReply { rx })
    }

    /// Drop every entry and cancel every deadline. Shutdown only: callers
    /// still awaiting resolution receive no terminal callback (awaitable
    /// callers observe [`CallFailure::Shutdown`] through the closed
    /// channel).
    pub async fn clear(&self) {
        let drained: Vec<CallId> = {
            let mut state = self.state.lock().await;
            state.accepting = false;
            let ids = state.entries.keys().cloned().collect();
            state.entries.clear();
            ids
        };
        for id in &drained {
            self.timeline.cancel(&self.trigger_key(id)).await;
        }
        if !drained.is_empty() {
            warn!(
                dropped = drained.len(),
                "registry cleared with unresolved calls"
            );
        }
    }

    /// Number of live entries.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    fn trigger_key(&self, id: &CallId) -> TriggerKey {
        TriggerKey::scoped(&self.scope, id.as_str())
    }
}

/// Timeline action performing the deadline side of the race.
struct DeadlineTrigger {
    registry: Weak<CallbackRegistry>,
    id: CallId,
    description: String,
}

#[async_trait]
impl TriggerHandler for DeadlineTrigger {
    async fn fire(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // Pull wins or loses atomically; a resolved call is a no-op here.
        if let Some(call) = registry.pull(&self.id).await {
            warn!(id = %self.id, description = %self.description, "call timed out");
            call.fail(CallFailure::Timeout {
                id: self.id.clone(),
                description: self.description.clone(),
            })
            .await;
        }
    }
}

/// Sink resolving a oneshot channel exactly once.
struct OneshotSink {
    tx: std::sync::Mutex<Option<oneshot::Sender<Result<serde_json::Value, CallFailure>>>>,
}

impl OneshotSink {
    fn take(&self) -> Option<oneshot::Sender<Result<serde_json::Value, CallFailure>>> {
        self.tx.lock().ok().and_then(|mut guard| guard.take())
    }
}

#[async_trait]
impl ReplySink for OneshotSink {
    async fn on_success(&self, result: serde_json::Value) {
        if let Some(tx) = self.take() {
            let _ = tx.send(Ok(result));
        }
    }

    async fn on_failure(&self, failure: CallFailure) {
        if let Some(tx) = self.take() {
            let _ = tx.send(Err(failure));
        }
    }
}

/// The awaitable side of [`CallbackRegistry::push_awaitable`].
pub struct PendingReply {
    rx: oneshot::Receiver<Result<serde_json::Value, CallFailure>>,
}

impl PendingReply {
    /// Await the call's terminal outcome.
    ///
    /// # Errors
    ///
    /// The call's failure; a registry cleared before resolution surfaces
    /// as [`CallFailure::Shutdown`].
    pub async fn outcome(self) -> Result<serde_json::Value, CallFailure> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_closed) => Err(CallFailure::Shutdown),
        }
    }
}
