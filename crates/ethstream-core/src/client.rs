//! The chain client contract and its JSON-RPC implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ChainError, TransportError};
use crate::request::JsonRpcRequest;
use crate::subscription::Subscription;
use crate::transport::{HealthStatus, RpcTransport};
use crate::types::{quantity, Block, BlockNumber, Header};

/// Everything the pipeline needs from an upstream node.
///
/// Every call may suspend on network I/O. Dropping the returned future
/// abandons the call, which is how callers cancel.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Header of the chain head.
    async fn latest_header(&self) -> Result<Header, ChainError>;

    /// Number of the chain head.
    async fn latest_block_number(&self) -> Result<u64, ChainError>;

    /// Full block (header + transactions) by number.
    async fn block_by_number(&self, number: BlockNumber) -> Result<Block, ChainError>;

    /// Full block (header + transactions) by hash.
    async fn block_by_hash(&self, hash: B256) -> Result<Block, ChainError>;

    /// Number of transactions in the block with this hash.
    async fn transaction_count(&self, block_hash: B256) -> Result<u64, ChainError>;

    /// Balance of `address` at the chain head, in wei.
    async fn balance_of(&self, address: Address) -> Result<U256, ChainError>;

    /// Live feed of headers as they are mined.
    async fn subscribe_new_headers(&self) -> Result<Subscription<Header>, ChainError>;
}

/// Establishes upstream links. One call per request.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, ChainError>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// [`ChainClient`] speaking Ethereum JSON-RPC over any [`RpcTransport`].
pub struct RpcChainClient {
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    pub fn health(&self) -> HealthStatus {
        self.transport.health()
    }

    /// Call `method` and return the raw result value.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        tracing::trace!(id, method, "rpc request");
        let resp = self
            .transport
            .send(req)
            .await
            .map_err(|e| ChainError::upstream(method, e))?;
        resp.into_result()
            .map_err(|e| ChainError::upstream(method, TransportError::Rpc(e)))
    }

    /// Call `method` and deserialize a non-null result.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ChainError> {
        let value = self.request(method, params).await?;
        if value.is_null() {
            return Err(ChainError::Upstream {
                method: method.to_string(),
                reason: "block not found".into(),
            });
        }
        serde_json::from_value(value).map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }

    async fn call_quantity(&self, method: &str, params: Vec<Value>) -> Result<u64, ChainError> {
        let raw: String = self.call(method, params).await?;
        quantity::decode(&raw)
            .ok_or_else(|| ChainError::Decode(format!("{method}: invalid quantity {raw:?}")))
    }
}

fn to_param<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_header(&self) -> Result<Header, ChainError> {
        self.call(
            "eth_getBlockByNumber",
            vec![BlockNumber::Latest.to_param(), Value::Bool(false)],
        )
        .await
    }

    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        self.call_quantity("eth_blockNumber", vec![]).await
    }

    async fn block_by_number(&self, number: BlockNumber) -> Result<Block, ChainError> {
        self.call(
            "eth_getBlockByNumber",
            vec![number.to_param(), Value::Bool(true)],
        )
        .await
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Block, ChainError> {
        self.call("eth_getBlockByHash", vec![to_param(&hash), Value::Bool(true)])
            .await
    }

    async fn transaction_count(&self, block_hash: B256) -> Result<u64, ChainError> {
        self.call_quantity("eth_getBlockTransactionCountByHash", vec![to_param(&block_hash)])
            .await
    }

    async fn balance_of(&self, address: Address) -> Result<U256, ChainError> {
        let raw: String = self
            .call(
                "eth_getBalance",
                vec![to_param(&address), BlockNumber::Latest.to_param()],
            )
            .await?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        U256::from_str_radix(digits, 16)
            .map_err(|e| ChainError::Decode(format!("eth_getBalance: invalid balance {raw:?}: {e}")))
    }

    async fn subscribe_new_headers(&self) -> Result<Subscription<Header>, ChainError> {
        let raw = self
            .transport
            .subscribe("newHeads", vec![])
            .await
            .map_err(ChainError::subscription)?;
        tracing::debug!(subscription = %raw.id, url = %self.transport.url(), "subscribed to newHeads");
        Ok(Subscription::from_raw(raw))
    }
}
