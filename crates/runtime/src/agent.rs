//! Agent assembly.
//!
//! One [`RuntimeContext`] per process holds the shared timeline and
//! transport; every agent receives it at construction. No component
//! reaches for a global to find a collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use hermod_state::AgentStore;

use crate::callbacks::{CallbackRegistry, ReplySink};
use crate::config::RuntimeConfig;
use crate::error::{CallFailure, RegistryError, RemoteError};
use crate::repeat::{RepeatRegistry, ResultCache};
use crate::rpc::{CallId, MethodRegistry, MethodRegistryBuilder, RpcError, RpcRequest};
use crate::sched::AgentScheduler;
use crate::timeline::{ScheduleTimeline, TimelineConfig};
use crate::transport::{Address, Endpoint, Envelope, LocalTransport, Transport};

/// Process-wide collaborators, constructed once and injected everywhere.
pub struct RuntimeContext {
    config: RuntimeConfig,
    timeline: Arc<ScheduleTimeline>,
    transport: Arc<LocalTransport>,
}

impl RuntimeContext {
    /// Create a runtime context from configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let timeline = ScheduleTimeline::with_config(TimelineConfig {
            dispatch_workers: config.dispatch_workers,
        });
        Self {
            config,
            timeline,
            transport: Arc::new(LocalTransport::new()),
        }
    }

    /// The runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The shared schedule timeline.
    #[must_use]
    pub fn timeline(&self) -> Arc<ScheduleTimeline> {
        Arc::clone(&self.timeline)
    }

    /// The in-process transport.
    #[must_use]
    pub fn transport(&self) -> Arc<LocalTransport> {
        Arc::clone(&self.transport)
    }

    /// Stop the shared timeline. Agents should be shut down first.
    pub async fn shutdown(&self) {
        self.timeline.shutdown().await;
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// The outbound call surface: correlation plus transport.
///
/// Consumers (repeat tasks, application code) treat this as the opaque
/// `invoke` black box; the correlation registry underneath guarantees a
/// single terminal outcome per call.
pub struct RemoteCaller {
    address: Address,
    transport: Arc<dyn Transport>,
    callbacks: Arc<CallbackRegistry>,
}

impl RemoteCaller {
    /// Create a caller sending from `address`.
    #[must_use]
    pub fn new(
        address: Address,
        transport: Arc<dyn Transport>,
        callbacks: Arc<CallbackRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            address,
            transport,
            callbacks,
        })
    }

    /// The sending address.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The correlation registry resolving this caller's replies.
    #[must_use]
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// Invoke a method on `target` and await its single outcome.
    ///
    /// # Errors
    ///
    /// The call's terminal failure: a timeout, a remote fault, a
    /// transport failure, or shutdown before resolution.
    pub async fn invoke(
        &self,
        target: &Address,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, CallFailure> {
        let request = RpcRequest::new(method, params);
        let id = request.id.clone();
        let pending = self
            .callbacks
            .push_awaitable(id.clone(), format!("{method} -> {target}"))
            .await
            .map_err(registration_failure)?;

        if let Err(err) = self
            .transport
            .deliver(target, &self.address, Envelope::Request(request))
            .await
        {
            let _ = self
                .callbacks
                .resolve_failure(&id, CallFailure::Remote(err))
                .await;
        }
        pending.outcome().await
    }

    /// Invoke a method on `target`, resolving through `sink` instead of a
    /// future. Returns the call id for correlation with logs.
    ///
    /// # Errors
    ///
    /// Same registration errors as [`CallbackRegistry::push`].
    pub async fn call_with_sink(
        &self,
        target: &Address,
        method: &str,
        params: serde_json::Value,
        sink: Box<dyn ReplySink>,
    ) -> Result<CallId, RegistryError> {
        let request = RpcRequest::new(method, params);
        let id = request.id.clone();
        self.callbacks
            .push(id.clone(), format!("{method} -> {target}"), sink)
            .await?;

        if let Err(err) = self
            .transport
            .deliver(target, &self.address, Envelope::Request(request))
            .await
        {
            let _ = self
                .callbacks
                .resolve_failure(&id, CallFailure::Remote(err))
                .await;
        }
        Ok(id)
    }
}

fn registration_failure(err: RegistryError) -> CallFailure {
    match err {
        RegistryError::ShutDown => CallFailure::Shutdown,
        RegistryError::DuplicateId { id } => CallFailure::Remote(RemoteError::transport(format!(
            "call id '{id}' already in flight"
        ))),
    }
}

/// A fully wired agent: durable state, scheduling, repeat tasks, and the
/// outbound call surface, registered as an endpoint on the transport.
pub struct Agent {
    id: String,
    address: Address,
    store: Arc<dyn AgentStore>,
    methods: Arc<MethodRegistry>,
    callbacks: Arc<CallbackRegistry>,
    caller: Arc<RemoteCaller>,
    scheduler: Arc<AgentScheduler>,
    repeats: Arc<RepeatRegistry>,
    transport: Arc<dyn Transport>,
}

impl Agent {
    /// Assemble an agent and register it on the runtime's transport.
    ///
    /// `methods` carries the application's handlers; the repeat-task
    /// handlers are appended before the map is finalized.
    pub async fn new(
        id: impl Into<String>,
        store: Arc<dyn AgentStore>,
        runtime: &RuntimeContext,
        methods: MethodRegistryBuilder,
    ) -> Arc<Self> {
        let id = id.into();
        let address = Address::local(&id);
        let transport: Arc<dyn Transport> = runtime.transport();

        let callbacks = CallbackRegistry::new(
            format!("calls/{id}"),
            runtime.timeline(),
            runtime.config().reply_timeout_ms,
        );
        let caller = RemoteCaller::new(
            address.clone(),
            Arc::clone(&transport),
            Arc::clone(&callbacks),
        );
        let scheduler = AgentScheduler::new(id.as_str(), Arc::clone(&store), runtime.timeline());
        let repeats = RepeatRegistry::new(
            id.as_str(),
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&caller),
            Arc::new(ResultCache::new()),
        );

        let methods = Arc::new(repeats.register_methods(methods).build());
        scheduler.bind_dispatcher(Arc::clone(&methods));

        let agent = Arc::new(Self {
            id,
            address: address.clone(),
            store,
            methods,
            callbacks,
            caller,
            scheduler,
            repeats,
            transport,
        });
        runtime
            .transport()
            .register(&address, Arc::clone(&agent) as Arc<dyn Endpoint>)
            .await;
        debug!(agent_id = %agent.id, "agent registered");
        agent
    }

    /// The agent's identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The agent's transport address.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The agent's durable store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AgentStore> {
        &self.store
    }

    /// The agent's task scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<AgentScheduler> {
        &self.scheduler
    }

    /// The agent's repeat-task registry.
    #[must_use]
    pub fn repeats(&self) -> &Arc<RepeatRegistry> {
        &self.repeats
    }

    /// The agent's outbound call surface.
    #[must_use]
    pub fn caller(&self) -> &Arc<RemoteCaller> {
        &self.caller
    }

    /// Invoke a method on another agent and await the outcome.
    ///
    /// # Errors
    ///
    /// See [`RemoteCaller::invoke`].
    pub async fn invoke(
        &self,
        target: &Address,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, CallFailure> {
        self.caller.invoke(target, method, params).await
    }

    /// Re-arm persisted scheduled tasks after construction over existing
    /// durable state.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored task map cannot be read.
    pub async fn resume(&self) -> hermod_state::StoreResult<()> {
        self.scheduler.resume().await
    }

    /// Withdraw from the runtime: drop pending calls without terminal
    /// callbacks, detach from the timeline, and leave the transport.
    pub async fn shutdown(&self, runtime: &RuntimeContext) {
        self.callbacks.clear().await;
        self.scheduler.suspend().await;
        runtime.transport().unregister(&self.address).await;
        debug!(agent_id = %self.id, "agent shut down");
    }
}

#[async_trait]
impl Endpoint for Agent {
    async fn receive(&self, from: Address, envelope: Envelope) {
        match envelope {
            Envelope::Request(request) => {
                let response = self.methods.dispatch(request).await;
                if let Err(err) = self
                    .transport
                    .deliver(&from, &self.address, Envelope::Response(response))
                    .await
                {
                    warn!(agent_id = %self.id, to = %from, error = %err, "reply delivery failed");
                }
            }
            Envelope::Response(response) => {
                let id = response.id.clone();
                match response.into_outcome() {
                    Ok(result) => {
                        let _ = self.callbacks.resolve_success(&id, result).await;
                    }
                    Err(RpcError { code, message }) => {
                        let _ = self
                            .callbacks
                            .resolve_failure(
                                &id,
                                CallFailure::Remote(RemoteError::Fault { code, message }),
                            )
                            .await;
                    }
                }
            }
        }
    }
}
