//! Error types for the transport layer and the block pipeline.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during a single RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The transport cannot perform this operation (e.g. subscriptions over HTTP).
    #[error("Unsupported by {transport} transport: {operation}")]
    Unsupported {
        transport: &'static str,
        operation: &'static str,
    },

    /// The transport has been shut down.
    #[error("Transport closed")]
    Closed,
}

/// Errors surfaced by the chain client, the enricher and the stream pipeline.
///
/// Every variant is confined to the request that produced it.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The upstream node could not be reached.
    #[error("Connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// A call to the node failed after connecting.
    #[error("Upstream call {method} failed: {reason}")]
    Upstream { method: String, reason: String },

    /// The notification feed failed to establish or broke mid-stream.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Header or address data was malformed or missing.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The request did not complete within its time budget.
    #[error("Timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl ChainError {
    /// Wrap a transport failure of `method` as an upstream error.
    pub fn upstream(method: &str, err: TransportError) -> Self {
        match err {
            TransportError::Timeout { ms } => Self::Timeout { ms },
            TransportError::Deserialization(e) => Self::Decode(format!("{method}: {e}")),
            other => Self::Upstream {
                method: method.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Wrap a transport failure while establishing or reading a subscription.
    pub fn subscription(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { ms } => Self::Timeout { ms },
            other => Self::Subscription(other.to_string()),
        }
    }

    /// Returns `true` if the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short machine-readable label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Upstream { .. } => "upstream",
            Self::Subscription(_) => "subscription",
            Self::Decode(_) => "decode",
            Self::Timeout { .. } => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_keeps_timeouts_distinct() {
        let err = ChainError::upstream("eth_getBlockByHash", TransportError::Timeout { ms: 250 });
        assert!(err.is_timeout());
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn upstream_wraps_rpc_errors() {
        let err = ChainError::upstream(
            "eth_getBalance",
            TransportError::Rpc(JsonRpcError {
                code: -32000,
                message: "header not found".into(),
                data: None,
            }),
        );
        assert_eq!(err.kind(), "upstream");
        assert!(err.to_string().contains("eth_getBalance"));
        assert!(err.to_string().contains("header not found"));
    }

    #[test]
    fn unsupported_subscription_is_a_subscription_error() {
        let err = ChainError::subscription(TransportError::Unsupported {
            transport: "http",
            operation: "eth_subscribe",
        });
        assert_eq!(err.kind(), "subscription");
    }
}
