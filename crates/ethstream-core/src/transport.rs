//! Wire-level abstraction under [`RpcChainClient`](crate::client::RpcChainClient).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::subscription::RawSubscription;

/// Link health as last observed by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Nothing observed yet.
    Unknown,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One JSON-RPC link to a node, shared as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Short protocol label for logs and errors, e.g. `"ws"`.
    fn kind(&self) -> &'static str;

    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// `eth_subscribe`. Transports without server push keep this default.
    async fn subscribe(
        &self,
        kind: &str,
        params: Vec<Value>,
    ) -> Result<RawSubscription, TransportError> {
        let _ = (kind, params);
        Err(TransportError::Unsupported {
            transport: self.kind(),
            operation: "eth_subscribe",
        })
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Endpoint URL.
    fn url(&self) -> &str;
}
