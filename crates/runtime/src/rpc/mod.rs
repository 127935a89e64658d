//! Wire types and method dispatch.

pub mod dispatch;
pub mod types;

pub use dispatch::{
    param_i64, param_str, FnHandler, MethodHandler, MethodRegistry, MethodRegistryBuilder,
    ParamSpec,
};
pub use types::{CallId, RpcError, RpcRequest, RpcResponse};
