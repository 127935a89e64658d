//! Method dispatch.
//!
//! Dispatch is an explicit method-name to handler map built once at agent
//! assembly. Each handler declares the parameters it requires; binding is
//! checked against that declaration before the handler runs, so a handler
//! never sees a request missing its inputs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::types::{RpcError, RpcRequest, RpcResponse};

/// An installed method implementation.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the method with already-validated parameters.
    async fn handle(&self, params: serde_json::Value) -> Result<serde_json::Value, RpcError>;
}

/// Adapter turning an async closure into a [`MethodHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, RpcError>> + Send,
{
    async fn handle(&self, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        (self.0)(params).await
    }
}

/// Declared parameter schema for a method.
#[derive(Debug, Clone, Default)]
pub struct ParamSpec {
    required: Vec<String>,
}

impl ParamSpec {
    /// A method taking no required parameters.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A method requiring the named top-level parameters.
    #[must_use]
    pub fn required(names: &[&str]) -> Self {
        Self {
            required: names.iter().map(|n| (*n).to_string()).collect(),
        }
    }

    /// Check a request's parameters against the declaration.
    fn bind(&self, params: &serde_json::Value) -> Result<(), RpcError> {
        if self.required.is_empty() {
            return Ok(());
        }
        let Some(object) = params.as_object() else {
            return Err(RpcError::invalid_params("params must be an object"));
        };
        for name in &self.required {
            if !object.contains_key(name) {
                return Err(RpcError::invalid_params(format!(
                    "missing required param '{name}'"
                )));
            }
        }
        Ok(())
    }
}

struct MethodEntry {
    spec: ParamSpec,
    handler: Arc<dyn MethodHandler>,
}

/// Builder assembling the method map once at startup.
#[derive(Default)]
pub struct MethodRegistryBuilder {
    methods: HashMap<String, MethodEntry>,
}

impl MethodRegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler under `name`, replacing any previous handler.
    #[must_use]
    pub fn register(
        mut self,
        name: impl Into<String>,
        spec: ParamSpec,
        handler: Arc<dyn MethodHandler>,
    ) -> Self {
        self.methods.insert(name.into(), MethodEntry { spec, handler });
        self
    }

    /// Install an async closure under `name`.
    #[must_use]
    pub fn register_fn<F, Fut>(self, name: impl Into<String>, spec: ParamSpec, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, RpcError>> + Send + 'static,
    {
        self.register(name, spec, Arc::new(FnHandler(f)))
    }

    /// Finalize the map.
    #[must_use]
    pub fn build(self) -> MethodRegistry {
        MethodRegistry {
            methods: self.methods,
        }
    }
}

/// Immutable method-name to handler map.
pub struct MethodRegistry {
    methods: HashMap<String, MethodEntry>,
}

impl MethodRegistry {
    /// Check whether a method name is installed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Names of all installed methods.
    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    /// Dispatch a request to its handler, producing a response.
    ///
    /// Never fails: unknown methods, unbound parameters, and handler
    /// errors all become error responses carrying the request's id.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        if request.method.is_empty() {
            return RpcResponse::failure(request.id, RpcError::invalid_request("empty method"));
        }
        let Some(entry) = self.methods.get(&request.method) else {
            debug!(method = %request.method, "no handler installed");
            return RpcResponse::failure(request.id, RpcError::method_not_found(&request.method));
        };
        if let Err(err) = entry.spec.bind(&request.params) {
            return RpcResponse::failure(request.id, err);
        }
        match entry.handler.handle(request.params).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(err) => RpcResponse::failure(request.id, err),
        }
    }
}

/// Extract a required string parameter.
///
/// # Errors
///
/// Returns an invalid-params error when the field is absent or not a string.
pub fn param_str(params: &serde_json::Value, name: &str) -> Result<String, RpcError> {
    params
        .get(name)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::invalid_params(format!("param '{name}' must be a string")))
}

/// Extract a required integer parameter.
///
/// # Errors
///
/// Returns an invalid-params error when the field is absent or not an integer.
pub fn param_i64(params: &serde_json::Value, name: &str) -> Result<i64, RpcError> {
    params
        .get(name)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| RpcError::invalid_params(format!("param '{name}' must be an integer")))
}
