//! WebSocket JSON-RPC client with request multiplexing and `eth_subscribe`.
//!
//! One background task owns the socket. Callers talk to it over a command
//! channel; responses are matched back to callers by wire ID. The link is
//! never re-established: when it drops, every pending call fails and every
//! subscription receives an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use ethstream_core::error::TransportError;
use ethstream_core::request::{Incoming, JsonRpcRequest, JsonRpcResponse, RpcId};
use ethstream_core::subscription::{RawSubscription, SubscriptionId};
use ethstream_core::transport::{HealthStatus, RpcTransport};

use crate::subscriptions::{Dispatch, Registration, SubscriptionManager};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<Result<JsonRpcResponse, TransportError>>;
type SubscribeReply = oneshot::Sender<Result<(SubscriptionId, Registration), TransportError>>;

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Bound on the opening handshake.
    pub connect_timeout: Duration,
    /// Bound on a single request/response round trip.
    pub request_timeout: Duration,
    /// Notifications buffered per subscription before it is errored.
    pub subscription_buffer: usize,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            subscription_buffer: 128,
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send {
        req: JsonRpcRequest,
        tx: Reply,
    },
    Subscribe {
        kind: String,
        params: Vec<Value>,
        tx: SubscribeReply,
    },
    Unsubscribe(SubscriptionId),
    Close,
}

/// A request in flight, keyed by wire ID.
enum Pending {
    Call { caller_id: RpcId, tx: Reply },
    Subscribe { kind: String, tx: SubscribeReply },
}

/// WebSocket JSON-RPC client.
pub struct WsRpcClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    connected: Arc<AtomicBool>,
    config: WsClientConfig,
}

impl WsRpcClient {
    /// Connect to `url` and start the background task.
    ///
    /// The handshake completes before this returns, so an unreachable node
    /// is reported here rather than on the first call.
    pub async fn connect(
        url: impl Into<String>,
        config: WsClientConfig,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        tracing::info!(url = %url, "connecting via WebSocket");

        let (socket, _) = time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            ms: config.connect_timeout.as_millis() as u64,
        })?
        .map_err(|e| TransportError::WebSocket(format!("connect to {url} failed: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        let connected = Arc::new(AtomicBool::new(true));
        let subscriptions = SubscriptionManager::new(config.subscription_buffer);

        tokio::spawn(ws_task(
            url.clone(),
            socket,
            cmd_rx,
            subscriptions,
            Arc::clone(&connected),
        ));

        Ok(Self {
            url,
            cmd_tx,
            connected,
            config,
        })
    }

    fn command(&self, cmd: WsCommand) -> Result<(), TransportError> {
        self.cmd_tx.send(cmd).map_err(|_| TransportError::Closed)
    }

    async fn round_trip<T>(
        &self,
        rx: oneshot::Receiver<Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        let limit = self.config.request_timeout;
        time::timeout(limit, rx)
            .await
            .map_err(|_| TransportError::Timeout {
                ms: limit.as_millis() as u64,
            })?
            .map_err(|_| TransportError::WebSocket("WS response dropped".into()))?
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl RpcTransport for WsRpcClient {
    fn kind(&self) -> &'static str {
        "ws"
    }

    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.command(WsCommand::Send { req, tx })?;
        self.round_trip(rx).await
    }

    async fn subscribe(
        &self,
        kind: &str,
        params: Vec<Value>,
    ) -> Result<RawSubscription, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.command(WsCommand::Subscribe {
            kind: kind.to_string(),
            params,
            tx,
        })?;
        let (id, registration) = self.round_trip(rx).await?;

        let cmd_tx = self.cmd_tx.clone();
        Ok(
            RawSubscription::new(id, registration.items, registration.error).on_release(
                move |id| {
                    let _ = cmd_tx.send(WsCommand::Unsubscribe(id.clone()));
                },
            ),
        )
    }

    fn health(&self) -> HealthStatus {
        if self.connected.load(Ordering::Relaxed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    socket: Socket,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: SubscriptionManager,
    connected: Arc<AtomicBool>,
) {
    let (mut sink, mut stream) = socket.split();
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let mut next_id: u64 = 1;

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let (wire, entry) = match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break "transport closed";
                    }
                    Some(WsCommand::Send { mut req, tx }) => {
                        let caller_id = std::mem::replace(&mut req.id, RpcId::Number(next_id));
                        (req, Some(Pending::Call { caller_id, tx }))
                    }
                    Some(WsCommand::Subscribe { kind, params, tx }) => {
                        let params = std::iter::once(Value::String(kind.clone()))
                            .chain(params)
                            .collect();
                        (
                            JsonRpcRequest::new(next_id, "eth_subscribe", params),
                            Some(Pending::Subscribe { kind, tx }),
                        )
                    }
                    Some(WsCommand::Unsubscribe(id)) => {
                        subscriptions.remove(&id);
                        tracing::debug!(subscription = %id, "unsubscribing");
                        (
                            JsonRpcRequest::new(next_id, "eth_unsubscribe", vec![Value::String(id.0)]),
                            None,
                        )
                    }
                };
                let id = next_id;
                next_id += 1;

                let text = match serde_json::to_string(&wire) {
                    Ok(text) => text,
                    Err(e) => {
                        if let Some(entry) = entry {
                            entry.fail(TransportError::Deserialization(e));
                        }
                        continue;
                    }
                };
                if let Some(entry) = entry {
                    pending.insert(id, entry);
                }
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(url = %url, error = %e, "WS send failed");
                    break "connection lost while sending";
                }
            }
            msg = stream.next() => {
                match msg {
                    None => break "connection closed by node",
                    Some(Err(e)) => {
                        tracing::warn!(url = %url, error = %e, "WS receive error");
                        break "connection lost";
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_message(text.as_str(), &mut pending, &subscriptions);
                    }
                    Some(Ok(Message::Close(_))) => break "connection closed by node",
                    _ => {}
                }
            }
        }
    };

    connected.store(false, Ordering::Relaxed);
    tracing::info!(url = %url, reason, pending = pending.len(), subscriptions = subscriptions.len(), "WS disconnected");
    for (_, entry) in pending.drain() {
        entry.fail(TransportError::WebSocket(reason.to_string()));
    }
    subscriptions.fail_all(reason);
}

impl Pending {
    fn fail(self, err: TransportError) {
        match self {
            Pending::Call { tx, .. } => {
                let _ = tx.send(Err(err));
            }
            Pending::Subscribe { tx, .. } => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

fn handle_message(
    text: &str,
    pending: &mut HashMap<u64, Pending>,
    subscriptions: &SubscriptionManager,
) {
    let resp = match Incoming::parse(text) {
        Some(Incoming::Notification(note)) => {
            let id = SubscriptionId(note.subscription);
            match subscriptions.dispatch(&id, note.result) {
                Dispatch::Delivered => {}
                Dispatch::Unknown => tracing::trace!(subscription = %id, "notification for released subscription"),
                Dispatch::Overflowed | Dispatch::Gone => {
                    tracing::debug!(subscription = %id, "subscription dropped during dispatch")
                }
            }
            return;
        }
        Some(Incoming::Response(resp)) => resp,
        None => {
            tracing::debug!("unrecognised WS message");
            return;
        }
    };
    let Some(entry) = resp.id.as_number().and_then(|id| pending.remove(&id)) else {
        // eth_unsubscribe acknowledgements land here.
        return;
    };

    match entry {
        Pending::Call { caller_id, tx } => {
            let _ = tx.send(Ok(JsonRpcResponse { id: caller_id, ..resp }));
        }
        Pending::Subscribe { kind, tx } => {
            let outcome = match resp.into_result() {
                Ok(Value::String(id)) => {
                    let id = SubscriptionId(id);
                    let registration = subscriptions.register(id.clone(), kind);
                    Ok((id, registration))
                }
                Ok(other) => Err(TransportError::WebSocket(format!(
                    "eth_subscribe returned a non-string id: {other}"
                ))),
                Err(e) => Err(TransportError::Rpc(e)),
            };
            if let Err(Ok((id, _))) = tx.send(outcome) {
                // Caller gave up before the node answered.
                subscriptions.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// What the scripted node does after acknowledging `eth_subscribe`.
    #[derive(Clone)]
    struct NodeScript {
        notifications: Vec<Value>,
        hang_up_after_subscribe: bool,
    }

    /// Accept one connection and answer it per `script`. Every request the
    /// node receives is forwarded on the returned channel.
    async fn scripted_node(script: NodeScript) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let req: Value = serde_json::from_str(text.as_str()).unwrap();
                let _ = seen_tx.send(req.clone());
                let id = req["id"].clone();
                let result = match req["method"].as_str().unwrap() {
                    "eth_subscribe" => json!("0xfeed"),
                    "eth_unsubscribe" => json!(true),
                    "eth_blockNumber" => json!("0x10"),
                    _ => Value::Null,
                };
                let reply = json!({ "jsonrpc": "2.0", "id": id, "result": result });
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();

                if req["method"] == "eth_subscribe" {
                    for item in &script.notifications {
                        let note = json!({
                            "jsonrpc": "2.0",
                            "method": "eth_subscription",
                            "params": { "subscription": "0xfeed", "result": item }
                        });
                        ws.send(Message::Text(note.to_string().into())).await.unwrap();
                    }
                    if script.hang_up_after_subscribe {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            }
        });

        (url, seen_rx)
    }

    fn quiet() -> NodeScript {
        NodeScript {
            notifications: vec![],
            hang_up_after_subscribe: false,
        }
    }

    #[tokio::test]
    async fn request_ids_are_restored_for_the_caller() {
        let (url, mut seen) = scripted_node(quiet()).await;
        let client = WsRpcClient::connect(url, WsClientConfig::default()).await.unwrap();
        assert_eq!(client.health(), HealthStatus::Healthy);

        let resp = client
            .send(JsonRpcRequest::new(777, "eth_blockNumber", vec![]))
            .await
            .unwrap();
        assert_eq!(resp.id, RpcId::Number(777));
        assert_eq!(resp.result, Some(json!("0x10")));

        let wire = seen.recv().await.unwrap();
        assert_eq!(wire["method"], "eth_blockNumber");
        assert_eq!(wire["id"], 1);
    }

    #[tokio::test]
    async fn notifications_reach_the_subscriber_and_release_unsubscribes() {
        let script = NodeScript {
            notifications: vec![json!({ "number": "0x1" }), json!({ "number": "0x2" })],
            hang_up_after_subscribe: false,
        };
        let (url, mut seen) = scripted_node(script).await;
        let client = WsRpcClient::connect(url, WsClientConfig::default()).await.unwrap();

        let mut raw = client.subscribe("newHeads", vec![]).await.unwrap();
        assert_eq!(raw.id, SubscriptionId("0xfeed".into()));
        assert_eq!(raw.items.recv().await.unwrap()["number"], "0x1");
        assert_eq!(raw.items.recv().await.unwrap()["number"], "0x2");

        let subscribe = seen.recv().await.unwrap();
        assert_eq!(subscribe["params"], json!(["newHeads"]));

        let release = raw.release.take().unwrap();
        release(&raw.id);
        let unsubscribe = seen.recv().await.unwrap();
        assert_eq!(unsubscribe["method"], "eth_unsubscribe");
        assert_eq!(unsubscribe["params"], json!(["0xfeed"]));
    }

    #[tokio::test]
    async fn disconnect_errors_the_subscription() {
        let script = NodeScript {
            notifications: vec![json!({ "number": "0x1" })],
            hang_up_after_subscribe: true,
        };
        let (url, _seen) = scripted_node(script).await;
        let client = WsRpcClient::connect(url, WsClientConfig::default()).await.unwrap();

        let mut raw = client.subscribe("newHeads", vec![]).await.unwrap();
        assert_eq!(raw.items.recv().await.unwrap()["number"], "0x1");

        let err = (&mut raw.error).await.unwrap();
        assert!(matches!(err, TransportError::WebSocket(_)));
        assert_eq!(client.health(), HealthStatus::Unhealthy);

        let err = client
            .send(JsonRpcRequest::new(1, "eth_blockNumber", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed | TransportError::WebSocket(_)));
    }

    #[tokio::test]
    async fn unreachable_node_fails_to_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = WsRpcClient::connect(url, WsClientConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::WebSocket(_)));
    }
}
