//! Per-agent task scheduling over durable state.
//!
//! The task map lives in the agent's store, so scheduled work survives a
//! process restart around a durable backend; the in-memory timeline only
//! ever holds one trigger per agent, armed for the earliest stored task.
//! Every mutation of the task map is a CAS retry loop.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use hermod_state::{update, AgentStore, StoreResult};

use crate::rpc::{MethodRegistry, RpcRequest};
use crate::timeline::{ScheduleTimeline, TriggerHandler, TriggerKey};

use super::task::TaskEntry;

const TASKS_KEY: &str = "_tasks";

/// Schedules requests against the owning agent, persisting the task map
/// in the agent's durable store.
pub struct AgentScheduler {
    agent_id: String,
    store: Arc<dyn AgentStore>,
    timeline: Arc<ScheduleTimeline>,
    dispatcher: OnceLock<Arc<MethodRegistry>>,
    /// Serializes evaluation passes so a due task dispatches once.
    eval_guard: Mutex<()>,
    this: Weak<Self>,
}

impl AgentScheduler {
    /// Create a scheduler for `agent_id`.
    ///
    /// The dispatcher is bound separately at agent assembly because the
    /// method map is finalized after the scheduler exists.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        store: Arc<dyn AgentStore>,
        timeline: Arc<ScheduleTimeline>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            agent_id: agent_id.into(),
            store,
            timeline,
            dispatcher: OnceLock::new(),
            eval_guard: Mutex::new(()),
            this: this.clone(),
        })
    }

    /// Bind the method registry that due requests dispatch into.
    ///
    /// Only the first binding takes effect.
    pub fn bind_dispatcher(&self, methods: Arc<MethodRegistry>) {
        let _ = self.dispatcher.set(methods);
    }

    /// Schedule `request` to run after `delay_ms` milliseconds.
    ///
    /// With `repeat`, the task re-arms itself every `delay_ms` after each
    /// run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when the task map cannot be read or written.
    pub async fn create_task(
        &self,
        request: RpcRequest,
        delay_ms: i64,
        repeat: bool,
    ) -> StoreResult<String> {
        let due = Utc::now() + Duration::milliseconds(delay_ms.max(0));
        let entry = TaskEntry::new(request, due, if repeat { delay_ms } else { 0 });
        let task_id = entry.task_id.clone();

        self.put_task(&entry, false).await?;
        debug!(agent_id = %self.agent_id, task_id = %task_id, "task created");
        self.evaluate().await?;
        Ok(task_id)
    }

    /// Remove a task. Unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the task map cannot be read or written.
    pub async fn cancel_task(&self, task_id: &str) -> StoreResult<()> {
        let task_id_owned = task_id.to_string();
        update(self.store.as_ref(), TASKS_KEY, move |old| {
            let mut tasks = decode_tasks(old)?;
            tasks.remove(&task_id_owned);
            Ok(serde_json::to_value(tasks)?)
        })
        .await?;
        debug!(agent_id = %self.agent_id, task_id = %task_id, "task cancelled");
        Ok(())
    }

    /// All stored tasks, earliest due first.
    ///
    /// # Errors
    ///
    /// Returns an error when the task map cannot be read.
    pub async fn tasks(&self) -> StoreResult<Vec<TaskEntry>> {
        let stored = self.store.read(TASKS_KEY).await?;
        let tasks = decode_tasks(stored.as_ref())?;
        let mut entries: Vec<TaskEntry> = tasks.into_values().collect();
        entries.sort_by(|a, b| a.due.cmp(&b.due).then_with(|| a.task_id.cmp(&b.task_id)));
        Ok(entries)
    }

    /// Re-arm the timeline from the stored task map.
    ///
    /// Call after constructing an agent over pre-existing durable state;
    /// overdue tasks run immediately.
    ///
    /// # Errors
    ///
    /// Returns an error when the task map cannot be read or written.
    pub async fn resume(&self) -> StoreResult<()> {
        self.evaluate().await
    }

    /// Drop this agent's wake trigger from the timeline. Stored tasks are
    /// untouched and re-arm on the next `resume`.
    pub async fn suspend(&self) {
        self.timeline.cancel(&self.trigger_key()).await;
    }

    /// Run everything due, then arm the timeline for the earliest
    /// remaining task.
    async fn evaluate(&self) -> StoreResult<()> {
        let _pass = self.eval_guard.lock().await;
        loop {
            let entries = self.tasks().await?;
            let Some(first) = entries.into_iter().next() else {
                self.timeline.cancel(&self.trigger_key()).await;
                return Ok(());
            };
            let now = Utc::now();
            if first.is_due(now) {
                self.run_task(first).await?;
                continue;
            }
            self.timeline
                .request_trigger(
                    self.trigger_key(),
                    first.due,
                    Arc::new(EvaluateTrigger {
                        scheduler: self.this.clone(),
                    }),
                )
                .await;
            return Ok(());
        }
    }

    /// Dispatch one due task and update or remove its stored entry.
    async fn run_task(&self, task: TaskEntry) -> StoreResult<()> {
        if let Some(methods) = self.dispatcher.get() {
            let methods = Arc::clone(methods);
            let request = task.request.clone();
            let agent_id = self.agent_id.clone();
            // Fire-and-forget: a slow handler must not stall the
            // evaluation pass or skew sibling tasks.
            tokio::spawn(async move {
                let response = methods.dispatch(request).await;
                if let Some(err) = response.error {
                    warn!(agent_id = %agent_id, error = %err, "scheduled request failed");
                }
            });
        } else {
            error!(
                agent_id = %self.agent_id,
                task_id = %task.task_id,
                "no dispatcher bound, dropping scheduled request"
            );
        }

        if task.is_repeating() {
            let next_due = Utc::now() + Duration::milliseconds(task.interval_ms);
            let rearmed = TaskEntry {
                due: next_due,
                ..task
            };
            // Re-insert only while the task still exists, so a concurrent
            // cancel is not resurrected.
            self.put_task(&rearmed, true).await
        } else {
            self.cancel_task(&task.task_id).await
        }
    }

    /// Insert `entry` into the stored task map through the CAS loop.
    ///
    /// With `only_if_present`, the insert is skipped when the task id is
    /// no longer in the map.
    async fn put_task(&self, entry: &TaskEntry, only_if_present: bool) -> StoreResult<()> {
        let entry = entry.clone();
        update(self.store.as_ref(), TASKS_KEY, move |old| {
            let mut tasks = decode_tasks(old)?;
            if !only_if_present || tasks.contains_key(&entry.task_id) {
                tasks.insert(entry.task_id.clone(), entry.clone());
            }
            Ok(serde_json::to_value(tasks)?)
        })
        .await?;
        Ok(())
    }

    fn trigger_key(&self) -> TriggerKey {
        TriggerKey::scoped("tasks", &self.agent_id)
    }
}

fn decode_tasks(
    value: Option<&serde_json::Value>,
) -> StoreResult<HashMap<String, TaskEntry>> {
    match value {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|err| hermod_state::StoreError::malformed(TASKS_KEY, err.to_string())),
        None => Ok(HashMap::new()),
    }
}

/// Timeline action re-entering the scheduler's evaluation.
struct EvaluateTrigger {
    scheduler: Weak<AgentScheduler>,
}

#[async_trait]
impl TriggerHandler for EvaluateTrigger {
    async fn fire(&self) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        if let Err(err) = scheduler.evaluate().await {
            error!(agent_id = %scheduler.agent_id, error = %err, "task evaluation failed");
        }
    }
}
