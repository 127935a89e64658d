//! Message transport.
//!
//! Upper layers treat the transport as an opaque black box: envelopes go
//! in, and replies come back as separate envelopes correlated by call id.
//! Addressing travels alongside the envelope, not inside the wire body.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::rpc::{RpcRequest, RpcResponse};

pub use local::LocalTransport;

/// A routable agent address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create an address from an existing string.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Address of an agent reachable inside this process.
    #[must_use]
    pub fn local(agent_id: &str) -> Self {
        Self(format!("local:{agent_id}"))
    }

    /// Get the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What travels between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// A method invocation.
    Request(RpcRequest),
    /// The reply to an earlier invocation.
    Response(RpcResponse),
}

/// Carries envelopes toward an address.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `envelope` to the endpoint at `to`.
    ///
    /// Delivery is asynchronous; a successful return means the transport
    /// accepted the message, not that the receiver processed it.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] when the transport cannot carry the
    /// message at all.
    async fn deliver(&self, to: &Address, from: &Address, envelope: Envelope)
        -> Result<(), RemoteError>;
}

/// A receiver of envelopes registered under an address.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Handle one incoming envelope.
    async fn receive(&self, from: Address, envelope: Envelope);
}
