//! Dials a fresh upstream link per request, picking the transport by URL scheme.

use std::sync::Arc;

use async_trait::async_trait;

use ethstream_core::client::{ChainClient, Connector, RpcChainClient};
use ethstream_core::error::{ChainError, TransportError};
use ethstream_core::transport::RpcTransport;
use ethstream_http::{HttpClientConfig, HttpRpcClient};
use ethstream_ws::{WsClientConfig, WsRpcClient};

/// Wire protocol implied by an endpoint URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    WebSocket,
    Http,
}

impl Scheme {
    pub fn of(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once("://")?;
        match scheme.to_ascii_lowercase().as_str() {
            "ws" | "wss" => Some(Self::WebSocket),
            "http" | "https" => Some(Self::Http),
            _ => None,
        }
    }
}

/// [`Connector`] for a single configured JSON-RPC endpoint.
pub struct EndpointConnector {
    url: String,
    display: String,
    ws: WsClientConfig,
    http: HttpClientConfig,
}

impl EndpointConnector {
    pub fn new(url: impl Into<String>, ws: WsClientConfig, http: HttpClientConfig) -> Self {
        let url = url.into();
        let display = redact(&url);
        Self {
            url,
            display,
            ws,
            http,
        }
    }

    fn refused(&self, reason: impl Into<String>) -> ChainError {
        ChainError::Connection {
            endpoint: self.display.clone(),
            reason: reason.into(),
        }
    }

    fn dial_error(&self, err: TransportError) -> ChainError {
        match err {
            TransportError::Timeout { ms } => ChainError::Timeout { ms },
            other => self.refused(other.to_string()),
        }
    }
}

#[async_trait]
impl Connector for EndpointConnector {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, ChainError> {
        let transport: Arc<dyn RpcTransport> = match Scheme::of(&self.url) {
            Some(Scheme::WebSocket) => Arc::new(
                WsRpcClient::connect(self.url.as_str(), self.ws.clone())
                    .await
                    .map_err(|e| self.dial_error(e))?,
            ),
            Some(Scheme::Http) => Arc::new(
                HttpRpcClient::new(self.url.as_str(), self.http.clone())
                    .map_err(|e| self.dial_error(e))?,
            ),
            None => return Err(self.refused("unsupported URL scheme (expected ws, wss, http or https)")),
        };
        tracing::debug!(endpoint = %self.display, "upstream connected");
        Ok(Arc::new(RpcChainClient::new(transport)))
    }

    fn endpoint(&self) -> &str {
        &self.display
    }
}

/// Scheme and host only. Provider URLs often carry API keys in the path
/// or userinfo.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<invalid endpoint>".into();
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    format!("{scheme}://{host}")
}
