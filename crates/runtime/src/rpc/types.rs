//! Wire types for remote calls.
//!
//! A request carries `{id, method, params}`; a response carries exactly
//! one of `{result}` or `{error: {code, message}}`. Timeouts are a local
//! resolution outcome and never appear in a response.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    /// Create a new unique call ID.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("call-{}", Uuid::new_v4()))
    }

    /// Create a call ID from an existing string.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An outbound method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id.
    pub id: CallId,
    /// Method name resolved by the receiver's method registry.
    pub method: String,
    /// Named parameters.
    pub params: serde_json::Value,
}

impl RpcRequest {
    /// Create a request with a fresh call id.
    #[must_use]
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: CallId::new(),
            method: method.into(),
            params,
        }
    }
}

/// An error carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
}

impl RpcError {
    /// The request was not a valid invocation.
    pub const INVALID_REQUEST: i64 = -32600;
    /// No handler is registered under the requested method name.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// The declared parameters did not bind.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Generic server fault.
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Create an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_REQUEST,
            message: message.into(),
        }
    }

    /// Create a method-not-found error.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("method '{method}' not found"),
        }
    }

    /// Create an invalid-params error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_PARAMS,
            message: message.into(),
        }
    }

    /// Create a generic server fault.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: Self::INTERNAL_ERROR,
            message: message.into(),
        }
    }
}

/// The reply to a request: a result or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Correlation id echoed from the request.
    pub id: CallId,
    /// Successful result, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Create a success response.
    #[must_use]
    pub fn success(id: CallId, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn failure(id: CallId, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check whether the response carries a result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    /// Collapse into the single outcome the wire shape promises.
    ///
    /// A malformed response carrying neither field maps to a generic
    /// server fault rather than a silent success.
    pub fn into_outcome(self) -> Result<serde_json::Value, RpcError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        match self.result {
            Some(result) => Ok(result),
            None => Err(RpcError::internal(
                "response carried neither result nor error",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_uniqueness() {
        let ids: Vec<CallId> = (0..100).map(|_| CallId::new()).collect();
        let unique = ids.iter().collect::<std::collections::HashSet<_>>().len();
        assert_eq!(unique, 100);
    }

    #[test]
    fn test_success_response_outcome() {
        let id = CallId::new();
        let response = RpcResponse::success(id, serde_json::json!({"ok": true}));
        assert!(response.is_success());
        assert_eq!(
            response.into_outcome().ok(),
            Some(serde_json::json!({"ok": true}))
        );
    }

    #[test]
    fn test_failure_response_outcome() {
        let id = CallId::new();
        let response = RpcResponse::failure(id, RpcError::method_not_found("ghost"));
        assert!(!response.is_success());
        let outcome = response.into_outcome();
        assert_eq!(
            outcome.err().map(|e| e.code),
            Some(RpcError::METHOD_NOT_FOUND)
        );
    }

    #[test]
    fn test_empty_response_is_a_fault() {
        let response = RpcResponse {
            id: CallId::new(),
            result: None,
            error: None,
        };
        let outcome = response.into_outcome();
        assert_eq!(
            outcome.err().map(|e| e.code),
            Some(RpcError::INTERNAL_ERROR)
        );
    }

    #[test]
    fn test_response_wire_shape_omits_absent_field() {
        let response = RpcResponse::success(CallId::from_string("c1"), serde_json::json!(1));
        let encoded = serde_json::to_string(&response).unwrap_or_default();
        assert!(encoded.contains("result"));
        assert!(!encoded.contains("error"));
    }

    #[test]
    fn test_request_round_trip() {
        let request = RpcRequest::new("time.now", serde_json::json!({"zone": "utc"}));
        let encoded = serde_json::to_value(&request).ok();
        let decoded: Option<RpcRequest> = encoded.and_then(|v| serde_json::from_value(v).ok());
        assert_eq!(decoded, Some(request));
    }
}
