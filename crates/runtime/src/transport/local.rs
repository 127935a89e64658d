//! In-process transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RemoteError;

use super::{Address, Endpoint, Envelope, Transport};

/// Routes envelopes between agents living in the same process.
///
/// Delivery is spawned onto the runtime so an agent invoking a method on
/// itself (or two agents calling each other) cannot deadlock on their own
/// receive paths.
#[derive(Default)]
pub struct LocalTransport {
    endpoints: RwLock<HashMap<String, Arc<dyn Endpoint>>>,
}

impl LocalTransport {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under `address`, replacing any previous one.
    pub async fn register(&self, address: &Address, endpoint: Arc<dyn Endpoint>) {
        let mut endpoints = self.endpoints.write().await;
        endpoints.insert(address.as_str().to_string(), endpoint);
    }

    /// Remove the endpoint under `address`.
    pub async fn unregister(&self, address: &Address) {
        let mut endpoints = self.endpoints.write().await;
        endpoints.remove(address.as_str());
    }

    /// Number of registered endpoints.
    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.read().await.len()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn deliver(
        &self,
        to: &Address,
        from: &Address,
        envelope: Envelope,
    ) -> Result<(), RemoteError> {
        let endpoint = {
            let endpoints = self.endpoints.read().await;
            endpoints.get(to.as_str()).cloned()
        };
        let Some(endpoint) = endpoint else {
            return Err(RemoteError::unknown_target(to.as_str()));
        };

        debug!(to = %to, from = %from, "delivering envelope");
        let from = from.clone();
        tokio::spawn(async move {
            endpoint.receive(from, envelope).await;
        });
        Ok(())
    }
}
