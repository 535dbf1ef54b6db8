//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Plain request/response: one POST per call, no retry. Server-push
//! subscriptions are not available over HTTP; `subscribe` keeps the
//! trait's refusing default.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use ethstream_core::error::TransportError;
use ethstream_core::request::{JsonRpcRequest, JsonRpcResponse};
use ethstream_core::transport::{HealthStatus, RpcTransport};

const UNKNOWN: u8 = 0;
const HEALTHY: u8 = 1;
const UNHEALTHY: u8 = 2;

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC client.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    last_outcome: AtomicU8,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            request_timeout: config.request_timeout,
            last_outcome: AtomicU8::new(UNKNOWN),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    fn map_reqwest(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| self.map_reqwest(e))
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let outcome = self.send_once(&req).await;
        match &outcome {
            Ok(_) => self.last_outcome.store(HEALTHY, Ordering::Relaxed),
            Err(e) => {
                self.last_outcome.store(UNHEALTHY, Ordering::Relaxed);
                tracing::warn!(method = %req.method, url = %self.url, error = %e, "HTTP request failed");
            }
        }
        outcome
    }

    fn health(&self) -> HealthStatus {
        match self.last_outcome.load(Ordering::Relaxed) {
            HEALTHY => HealthStatus::Healthy,
            UNHEALTHY => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response with `status` and `body`.
    async fn one_shot_server(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = tcp.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            tcp.write_all(response.as_bytes()).await.unwrap();
            tcp.shutdown().await.unwrap();
        });

        url
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    #[tokio::test]
    async fn successful_call_returns_response() {
        let body = json!({ "jsonrpc": "2.0", "id": 3, "result": "0x64" }).to_string();
        let url = one_shot_server("200 OK", body).await;
        let client = HttpRpcClient::default_for(url).unwrap();
        assert_eq!(client.health(), HealthStatus::Unknown);

        let resp = client
            .send(JsonRpcRequest::new(3, "eth_blockNumber", vec![]))
            .await
            .unwrap();
        assert_eq!(resp.into_result().unwrap(), json!("0x64"));
        assert_eq!(client.health(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn non_success_status_is_an_http_error() {
        let url = one_shot_server("503 Service Unavailable", "overloaded".into()).await;
        let client = HttpRpcClient::default_for(url).unwrap();

        let err = client
            .send(JsonRpcRequest::new(1, "eth_blockNumber", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http(ref msg) if msg.contains("503")));
        assert_eq!(client.health(), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn subscriptions_are_unsupported() {
        let client = HttpRpcClient::default_for("http://127.0.0.1:1").unwrap();
        let err = client.subscribe("newHeads", vec![]).await.err().unwrap();
        assert!(matches!(err, TransportError::Unsupported { .. }));
    }
}
