//! Repeat-task registration and driving.
//!
//! A poll is a repeating scheduler task on the owning agent; a push asks
//! the counterpart to do the scheduling and deliver results back. Both
//! directions persist their descriptors through the CAS discipline, and
//! both feed the same process-local result cache.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use hermod_state::{update, AgentStore, StoreResult};

use crate::agent::RemoteCaller;
use crate::error::RepeatError;
use crate::rpc::{param_i64, param_str, MethodRegistryBuilder, ParamSpec, RpcError};
use crate::sched::AgentScheduler;

use super::cache::{CachedResult, ResultCache};
use super::task::RepeatTask;

const REPEATS_KEY: &str = "_repeats";
const PUSH_REGISTRATIONS_KEY: &str = "_push_registrations";

/// Manages one agent's repeat tasks and the inbound push registrations
/// other agents hold against it.
pub struct RepeatRegistry {
    agent_id: String,
    state: Arc<dyn AgentStore>,
    scheduler: Arc<AgentScheduler>,
    caller: Arc<RemoteCaller>,
    cache: Arc<ResultCache>,
}

impl RepeatRegistry {
    /// Create a registry for `agent_id`.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        state: Arc<dyn AgentStore>,
        scheduler: Arc<AgentScheduler>,
        caller: Arc<RemoteCaller>,
        cache: Arc<ResultCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent_id: agent_id.into(),
            state,
            scheduler,
            caller,
            cache,
        })
    }

    /// Persist `task` into the owning agent's durable state.
    ///
    /// # Errors
    ///
    /// Returns an error when the descriptor map cannot be read or written.
    pub async fn store(&self, task: &RepeatTask) -> StoreResult<()> {
        let task = task.clone();
        update(self.state.as_ref(), REPEATS_KEY, move |old| {
            let mut repeats = decode_repeats(old)?;
            repeats.insert(task.id.clone(), task.clone());
            Ok(serde_json::to_value(repeats)?)
        })
        .await?;
        Ok(())
    }

    /// Look up a descriptor by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the descriptor map cannot be read.
    pub async fn get(&self, repeat_id: &str) -> StoreResult<Option<RepeatTask>> {
        let stored = self.state.read(REPEATS_KEY).await?;
        let repeats = decode_repeats(stored.as_ref())?;
        Ok(repeats.get(repeat_id).cloned())
    }

    /// All stored descriptors.
    ///
    /// # Errors
    ///
    /// Returns an error when the descriptor map cannot be read.
    pub async fn list(&self) -> StoreResult<Vec<RepeatTask>> {
        let stored = self.state.read(REPEATS_KEY).await?;
        let repeats = decode_repeats(stored.as_ref())?;
        let mut tasks: Vec<RepeatTask> = repeats.into_values().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    /// Register a recurring local poll of the task's counterpart.
    ///
    /// Any schedule already driving this task is cancelled first, then a
    /// repeating scheduler task is created that fires `repeat.fire` every
    /// `interval_ms`. The updated descriptor is persisted and returned.
    ///
    /// # Errors
    ///
    /// Returns an error when scheduling or persisting fails.
    pub async fn add_poll(
        &self,
        mut task: RepeatTask,
        interval_ms: i64,
    ) -> Result<RepeatTask, RepeatError> {
        for schedule_id in task.schedule_ids.drain(..) {
            self.scheduler.cancel_task(&schedule_id).await?;
        }

        let request = crate::rpc::RpcRequest::new(
            "repeat.fire",
            serde_json::json!({ "repeat_id": task.id }),
        );
        let schedule_id = self.scheduler.create_task(request, interval_ms, true).await?;
        task.schedule_ids.push(schedule_id);
        self.store(&task).await?;
        info!(agent_id = %self.agent_id, repeat_id = %task.id, interval_ms, "poll registered");
        Ok(task)
    }

    /// Ask the counterpart to push results instead of polling it.
    ///
    /// No local timer is armed; the counterpart schedules the evaluation
    /// and delivers each result through `repeat.deliver`.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote registration or persisting fails.
    pub async fn add_push(
        &self,
        mut task: RepeatTask,
        interval_ms: i64,
    ) -> Result<RepeatTask, RepeatError> {
        let push_id = format!("push-{}", Uuid::new_v4());
        let registration = serde_json::json!({
            "push_id": push_id,
            "repeat_id": task.id,
            "interval_ms": interval_ms,
            "method": task.method,
            "params": task.params,
            "origin": self.caller.address().as_str(),
        });
        self.caller
            .invoke(&task.target, "repeat.register_push", registration)
            .await?;

        task.push_ids.push(push_id);
        self.store(&task).await?;
        info!(agent_id = %self.agent_id, repeat_id = %task.id, "push registered on counterpart");
        Ok(task)
    }

    /// Cancel a repeat task: stop its schedules, unregister its pushes,
    /// drop its descriptor and cached result.
    ///
    /// # Errors
    ///
    /// Returns [`RepeatError::UnknownRepeat`] when no descriptor exists;
    /// push unregistration failures are logged, not propagated, so a dead
    /// counterpart cannot wedge the cancel.
    pub async fn cancel(&self, repeat_id: &str) -> Result<(), RepeatError> {
        let Some(task) = self.get(repeat_id).await? else {
            return Err(RepeatError::UnknownRepeat {
                id: repeat_id.to_string(),
            });
        };

        for schedule_id in &task.schedule_ids {
            self.scheduler.cancel_task(schedule_id).await?;
        }
        let unregistrations = task.push_ids.iter().map(|push_id| {
            let caller = Arc::clone(&self.caller);
            let target = task.target.clone();
            async move {
                let unregister = caller
                    .invoke(
                        &target,
                        "repeat.unregister_push",
                        serde_json::json!({ "push_id": push_id }),
                    )
                    .await;
                if let Err(err) = unregister {
                    warn!(push_id = %push_id, error = %err, "push unregistration failed");
                }
            }
        });
        futures::future::join_all(unregistrations).await;

        let repeat_id_owned = repeat_id.to_string();
        update(self.state.as_ref(), REPEATS_KEY, move |old| {
            let mut repeats = decode_repeats(old)?;
            repeats.remove(&repeat_id_owned);
            Ok(serde_json::to_value(repeats)?)
        })
        .await?;
        self.cache.invalidate(repeat_id);
        info!(agent_id = %self.agent_id, repeat_id = %repeat_id, "repeat task cancelled");
        Ok(())
    }

    /// Perform one poll: invoke the counterpart, cache and forward the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns an error when the descriptor is unknown or the invocation
    /// fails.
    pub async fn fire(&self, repeat_id: &str) -> Result<serde_json::Value, RepeatError> {
        let Some(task) = self.get(repeat_id).await? else {
            return Err(RepeatError::UnknownRepeat {
                id: repeat_id.to_string(),
            });
        };

        let result = self
            .caller
            .invoke(&task.target, &task.method, task.params.clone())
            .await?;
        self.absorb_result(&task, result.clone()).await;
        Ok(result)
    }

    /// The cached last result for a repeat task, when caching is enabled
    /// and a result has arrived since the process started.
    #[must_use]
    pub fn cached(&self, repeat_id: &str) -> Option<CachedResult> {
        self.cache.get(repeat_id)
    }

    /// The underlying result cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Cache and forward a freshly observed result for `task`.
    async fn absorb_result(&self, task: &RepeatTask, result: serde_json::Value) {
        if task.has_cache() {
            self.cache.insert(&task.id, result.clone());
        }
        if let Some(callback_method) = &task.callback_method {
            let own_address = self.caller.address().clone();
            let forwarded = self
                .caller
                .invoke(
                    &own_address,
                    callback_method,
                    serde_json::json!({ "repeat_id": task.id, "result": result }),
                )
                .await;
            if let Err(err) = forwarded {
                warn!(repeat_id = %task.id, error = %err, "result callback failed");
            }
        }
    }

    /// Install the repeat-task method handlers on an agent's method map.
    #[must_use]
    pub fn register_methods(self: &Arc<Self>, builder: MethodRegistryBuilder) -> MethodRegistryBuilder {
        let fire_registry = Arc::clone(self);
        let register_registry = Arc::clone(self);
        let push_fire_registry = Arc::clone(self);
        let unregister_registry = Arc::clone(self);
        let deliver_registry = Arc::clone(self);

        builder
            .register_fn(
                "repeat.fire",
                ParamSpec::required(&["repeat_id"]),
                move |params| {
                    let registry = Arc::clone(&fire_registry);
                    async move {
                        let repeat_id = param_str(&params, "repeat_id")?;
                        registry
                            .fire(&repeat_id)
                            .await
                            .map_err(|err| RpcError::internal(err.to_string()))
                    }
                },
            )
            .register_fn(
                "repeat.register_push",
                ParamSpec::required(&[
                    "push_id",
                    "repeat_id",
                    "interval_ms",
                    "method",
                    "params",
                    "origin",
                ]),
                move |params| {
                    let registry = Arc::clone(&register_registry);
                    async move { registry.handle_register_push(&params).await }
                },
            )
            .register_fn(
                "repeat.push_fire",
                ParamSpec::required(&["push_id", "repeat_id", "method", "origin"]),
                move |params| {
                    let registry = Arc::clone(&push_fire_registry);
                    async move { registry.handle_push_fire(&params).await }
                },
            )
            .register_fn(
                "repeat.unregister_push",
                ParamSpec::required(&["push_id"]),
                move |params| {
                    let registry = Arc::clone(&unregister_registry);
                    async move { registry.handle_unregister_push(&params).await }
                },
            )
            .register_fn(
                "repeat.deliver",
                ParamSpec::required(&["push_id", "repeat_id", "result"]),
                move |params| {
                    let registry = Arc::clone(&deliver_registry);
                    async move { registry.handle_deliver(&params).await }
                },
            )
    }

    /// Counterpart side: install a repeating evaluation pushing results
    /// back to the origin. Re-registering a push id replaces its schedule.
    async fn handle_register_push(
        &self,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let push_id = param_str(params, "push_id")?;
        let repeat_id = param_str(params, "repeat_id")?;
        let interval_ms = param_i64(params, "interval_ms")?;
        let method = param_str(params, "method")?;
        let origin = param_str(params, "origin")?;
        let inner_params = params
            .get("params")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let registrations = self
            .push_registrations()
            .await
            .map_err(|err| RpcError::internal(err.to_string()))?;
        if let Some(stale_schedule) = registrations.get(&push_id) {
            self.scheduler
                .cancel_task(stale_schedule)
                .await
                .map_err(|err| RpcError::internal(err.to_string()))?;
        }

        let request = crate::rpc::RpcRequest::new(
            "repeat.push_fire",
            serde_json::json!({
                "push_id": push_id,
                "repeat_id": repeat_id,
                "method": method,
                "params": inner_params,
                "origin": origin,
            }),
        );
        let schedule_id = self
            .scheduler
            .create_task(request, interval_ms, true)
            .await
            .map_err(|err| RpcError::internal(err.to_string()))?;

        let push_id_owned = push_id.clone();
        update(self.state.as_ref(), PUSH_REGISTRATIONS_KEY, move |old| {
            let mut registrations = decode_registrations(old)?;
            registrations.insert(push_id_owned.clone(), schedule_id.clone());
            Ok(serde_json::to_value(registrations)?)
        })
        .await
        .map_err(|err| RpcError::internal(err.to_string()))?;

        debug!(agent_id = %self.agent_id, push_id = %push_id, "push registration installed");
        Ok(serde_json::Value::Null)
    }

    /// Counterpart side: evaluate the pushed method locally and deliver
    /// the result to the origin.
    async fn handle_push_fire(
        &self,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let push_id = param_str(params, "push_id")?;
        let repeat_id = param_str(params, "repeat_id")?;
        let method = param_str(params, "method")?;
        let origin = param_str(params, "origin")?;
        let inner_params = params
            .get("params")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let own_address = self.caller.address().clone();
        let result = self
            .caller
            .invoke(&own_address, &method, inner_params)
            .await
            .map_err(|err| RpcError::internal(err.to_string()))?;

        self.caller
            .invoke(
                &crate::transport::Address::new(origin),
                "repeat.deliver",
                serde_json::json!({
                    "push_id": push_id,
                    "repeat_id": repeat_id,
                    "result": result,
                }),
            )
            .await
            .map_err(|err| RpcError::internal(err.to_string()))?;
        Ok(serde_json::Value::Null)
    }

    /// Counterpart side: tear down a push registration. Unknown push ids
    /// are a no-op.
    async fn handle_unregister_push(
        &self,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let push_id = param_str(params, "push_id")?;

        let registrations = self
            .push_registrations()
            .await
            .map_err(|err| RpcError::internal(err.to_string()))?;
        if let Some(schedule_id) = registrations.get(&push_id) {
            self.scheduler
                .cancel_task(schedule_id)
                .await
                .map_err(|err| RpcError::internal(err.to_string()))?;
        }

        let push_id_owned = push_id.clone();
        update(self.state.as_ref(), PUSH_REGISTRATIONS_KEY, move |old| {
            let mut registrations = decode_registrations(old)?;
            registrations.remove(&push_id_owned);
            Ok(serde_json::to_value(registrations)?)
        })
        .await
        .map_err(|err| RpcError::internal(err.to_string()))?;

        debug!(agent_id = %self.agent_id, push_id = %push_id, "push registration removed");
        Ok(serde_json::Value::Null)
    }

    /// Origin side: absorb a pushed result.
    async fn handle_deliver(
        &self,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let repeat_id = param_str(params, "repeat_id")?;
        let result = params
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        match self.get(&repeat_id).await {
            Ok(Some(task)) => {
                self.absorb_result(&task, result).await;
            }
            Ok(None) => {
                debug!(repeat_id = %repeat_id, "push delivery for unknown repeat task ignored");
            }
            Err(err) => return Err(RpcError::internal(err.to_string())),
        }
        Ok(serde_json::Value::Null)
    }

    async fn push_registrations(&self) -> StoreResult<HashMap<String, String>> {
        let stored = self.state.read(PUSH_REGISTRATIONS_KEY).await?;
        decode_registrations(stored.as_ref())
    }
}

fn decode_repeats(
    value: Option<&serde_json::Value>,
) -> StoreResult<HashMap<String, RepeatTask>> {
    match value {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|err| hermod_state::StoreError::malformed(REPEATS_KEY, err.to_string())),
        None => Ok(HashMap::new()),
    }
}

fn decode_registrations(
    value: Option<&serde_json::Value>,
) -> StoreResult<HashMap<String, String>> {
    match value {
        Some(value) => serde_json::from_value(value.clone()).map_err(|err| {
            hermod_state::StoreError::malformed(PUSH_REGISTRATIONS_KEY, err.to_string())
        }),
        None => Ok(HashMap::new()),
    }
}
