//! Repeat-task descriptors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::Address;

/// A persisted recurring remote invocation.
///
/// Owned by one agent and stored in that agent's durable state; the
/// descriptor survives restarts, while any cached results do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatTask {
    /// Unique repeat-task identifier.
    pub id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Remote counterpart being invoked.
    pub target: Address,
    /// Method invoked on the counterpart.
    pub method: String,
    /// Parameters for the invocation.
    pub params: serde_json::Value,
    /// Local method each new result is forwarded to, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_method: Option<String>,
    /// Scheduler task ids driving local polling.
    #[serde(default)]
    pub schedule_ids: Vec<String>,
    /// Push registrations held by the counterpart.
    #[serde(default)]
    pub push_ids: Vec<String>,
    /// Result-cache flavor, when results should be retained locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_kind: Option<String>,
}

impl RepeatTask {
    /// Cache kind storing the last observed result.
    pub const CACHE_LAST_RESULT: &'static str = "last_result";

    /// Create a descriptor with a fresh id.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        target: Address,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("repeat-{}", Uuid::new_v4()),
            agent_id: agent_id.into(),
            target,
            method: method.into(),
            params,
            callback_method: None,
            schedule_ids: Vec::new(),
            push_ids: Vec::new(),
            cache_kind: None,
        }
    }

    /// Forward each new result to a local method.
    #[must_use]
    pub fn with_callback(mut self, method: impl Into<String>) -> Self {
        self.callback_method = Some(method.into());
        self
    }

    /// Retain results in the process-local cache.
    #[must_use]
    pub fn with_cache(mut self, kind: impl Into<String>) -> Self {
        self.cache_kind = Some(kind.into());
        self
    }

    /// Whether this task retains results locally.
    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.cache_kind.is_some()
    }
}
