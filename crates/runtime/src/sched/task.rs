//! Persisted scheduled invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rpc::RpcRequest;

/// One scheduled invocation in an agent's durable task map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    /// Unique task identifier.
    pub task_id: String,
    /// The request dispatched to the owning agent when due.
    pub request: RpcRequest,
    /// When the task should next run.
    pub due: DateTime<Utc>,
    /// Re-arm interval in milliseconds; non-positive means one-shot.
    pub interval_ms: i64,
}

impl TaskEntry {
    /// Create a task entry with a fresh id.
    #[must_use]
    pub fn new(request: RpcRequest, due: DateTime<Utc>, interval_ms: i64) -> Self {
        Self {
            task_id: format!("task-{}", Uuid::new_v4()),
            request,
            due,
            interval_ms,
        }
    }

    /// Whether the task re-arms itself after running.
    #[must_use]
    pub fn is_repeating(&self) -> bool {
        self.interval_ms > 0
    }

    /// Whether the task should run now.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due <= now
    }
}
