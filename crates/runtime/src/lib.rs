//! # hermod-runtime
//!
//! Coordination core for multi-agent runtimes. Agents issue asynchronous
//! calls correlated by id, share one schedule timeline that wakes exactly
//! once per earliest due trigger, persist their scheduled work through a
//! compare-and-swap store, and compose those pieces into recurring
//! poll/push invocations.
//!
//! The pieces, leaves first:
//!
//! - [`callbacks::CallbackRegistry`] resolves each pending call exactly
//!   once, reply and deadline racing through an atomic remove-and-return.
//! - [`timeline::ScheduleTimeline`] orders every pending trigger by due
//!   time and keeps a single wake timer armed.
//! - [`sched::AgentScheduler`] persists per-agent scheduled invocations
//!   over the durable store from `hermod-state`.
//! - [`repeat::RepeatRegistry`] drives recurring remote invocations,
//!   polled locally or pushed by the counterpart.
//! - [`agent::Agent`] wires it all together over an explicit
//!   [`agent::RuntimeContext`].

pub mod agent;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod repeat;
pub mod rpc;
pub mod sched;
pub mod timeline;
pub mod transport;

pub use agent::{Agent, RemoteCaller, RuntimeContext};
pub use callbacks::{CallbackRegistry, PendingCall, PendingReply, ReplySink};
pub use config::RuntimeConfig;
pub use error::{CallFailure, RegistryError, RemoteError, RepeatError};
pub use repeat::{CachedResult, RepeatRegistry, RepeatTask, ResultCache};
pub use rpc::{CallId, MethodRegistry, MethodRegistryBuilder, ParamSpec, RpcError, RpcRequest, RpcResponse};
pub use sched::{AgentScheduler, TaskEntry};
pub use timeline::{ScheduleTimeline, TimelineConfig, TriggerHandler, TriggerKey};
pub use transport::{Address, Endpoint, Envelope, LocalTransport, Transport};
