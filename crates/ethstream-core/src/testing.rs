//! In-memory chain and connector for tests.
//!
//! [`MockChain`] serves blocks from a table, counts block resolutions and
//! live subscriptions, and hands each `newHeads` subscription's producer side
//! to the test as a [`HeaderFeed`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::client::{ChainClient, Connector};
use crate::error::{ChainError, TransportError};
use crate::subscription::{RawSubscription, Subscription, SubscriptionId};
use crate::types::{Block, BlockNumber, Header, Transaction};

/// Buffer between a [`HeaderFeed`] and its subscription.
const FEED_CAPACITY: usize = 64;

/// Deterministic hash for block `number`.
pub fn block_hash(number: u64) -> B256 {
    B256::left_padding_from(&number.to_be_bytes())
}

/// Header for block `number`, mined by `0xaaaa…aa`.
pub fn header(number: u64) -> Header {
    Header {
        number,
        hash: block_hash(number),
        parent_hash: block_hash(number.saturating_sub(1)),
        timestamp: 1_700_000_000 + number * 12,
        miner: Some(format!("{:#x}", Address::repeat_byte(0xaa))),
        extra: Map::new(),
    }
}

/// Block `number` carrying `tx_count` transactions.
pub fn block(number: u64, tx_count: usize) -> Block {
    let transactions = (0..tx_count)
        .map(|i| {
            Transaction(json!({
                "hash": format!("{:#x}", B256::left_padding_from(&[number as u8, i as u8, 0xff])),
                "blockNumber": format!("{number:#x}"),
                "transactionIndex": format!("{i:#x}"),
            }))
        })
        .collect();
    Block {
        header: header(number),
        transactions,
    }
}

// ─── HeaderFeed ───────────────────────────────────────────────────────────────

/// Producer side of one mock `newHeads` subscription.
#[derive(Debug)]
pub struct HeaderFeed {
    items: mpsc::Sender<Value>,
    error: Option<oneshot::Sender<TransportError>>,
}

impl HeaderFeed {
    /// Push a header, waiting for buffer space. Returns `false` once the
    /// subscription has been released.
    pub async fn push(&self, header: &Header) -> bool {
        self.items.send(to_value(header)).await.is_ok()
    }

    /// Push without waiting.
    pub fn try_push(&self, header: &Header) -> bool {
        self.items.try_send(to_value(header)).is_ok()
    }

    /// Push a raw notification payload.
    pub async fn push_raw(&self, value: Value) -> bool {
        self.items.send(value).await.is_ok()
    }

    /// Break the feed with a transport error.
    pub fn fail(&mut self, reason: &str) {
        if let Some(tx) = self.error.take() {
            let _ = tx.send(TransportError::WebSocket(reason.to_string()));
        }
    }

    /// End the feed without an error.
    pub fn end(self) {}

    pub fn is_released(&self) -> bool {
        self.items.is_closed()
    }
}

fn to_value(header: &Header) -> Value {
    serde_json::to_value(header).unwrap_or(Value::Null)
}

// ─── MockChain ────────────────────────────────────────────────────────────────

/// A [`ChainClient`] over an in-memory block table.
#[derive(Default)]
pub struct MockChain {
    blocks: Mutex<HashMap<B256, Block>>,
    balances: Mutex<HashMap<Address, U256>>,
    feeds: Mutex<VecDeque<HeaderFeed>>,
    resolved: Mutex<Vec<B256>>,
    active_subscriptions: Arc<AtomicUsize>,
    subscribe_failure: Mutex<Option<String>>,
    block_failure: Mutex<Option<String>>,
    balance_failure: Mutex<Option<String>>,
    latency: Mutex<Option<Duration>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.hash(), block);
    }

    pub fn set_balance(&self, address: Address, wei: U256) {
        self.balances.lock().unwrap().insert(address, wei);
    }

    /// Make every `newHeads` subscription attempt fail.
    pub fn fail_subscriptions(&self, reason: &str) {
        *self.subscribe_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Make every block/header lookup fail.
    pub fn fail_blocks(&self, reason: &str) {
        *self.block_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Make every balance lookup fail.
    pub fn fail_balances(&self, reason: &str) {
        *self.balance_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Delay every block lookup.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Producer side of the oldest subscription not yet taken.
    pub fn take_feed(&self) -> Option<HeaderFeed> {
        self.feeds.lock().unwrap().pop_front()
    }

    /// Number of `block_by_hash` calls so far.
    pub fn resolution_count(&self) -> usize {
        self.resolved.lock().unwrap().len()
    }

    /// Hashes passed to `block_by_hash`, in call order.
    pub fn resolved_hashes(&self) -> Vec<B256> {
        self.resolved.lock().unwrap().clone()
    }

    /// Subscriptions opened and not yet released.
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    async fn lookup(&self, method: &str) -> Result<(), ChainError> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.block_failure.lock().unwrap().clone() {
            Some(reason) => Err(ChainError::Upstream {
                method: method.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn head(&self) -> Option<Block> {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .max_by_key(|b| b.number())
            .cloned()
    }

    fn not_found(method: &str) -> ChainError {
        ChainError::Upstream {
            method: method.to_string(),
            reason: "block not found".into(),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_header(&self) -> Result<Header, ChainError> {
        self.lookup("eth_getBlockByNumber").await?;
        self.head()
            .map(|b| b.header)
            .ok_or_else(|| Self::not_found("eth_getBlockByNumber"))
    }

    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        self.lookup("eth_blockNumber").await?;
        Ok(self.head().map(|b| b.number()).unwrap_or(0))
    }

    async fn block_by_number(&self, number: BlockNumber) -> Result<Block, ChainError> {
        self.lookup("eth_getBlockByNumber").await?;
        let found = match number {
            BlockNumber::Latest => self.head(),
            BlockNumber::Number(n) => self
                .blocks
                .lock()
                .unwrap()
                .values()
                .find(|b| b.number() == n)
                .cloned(),
        };
        found.ok_or_else(|| Self::not_found("eth_getBlockByNumber"))
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Block, ChainError> {
        self.resolved.lock().unwrap().push(hash);
        self.lookup("eth_getBlockByHash").await?;
        self.blocks
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| Self::not_found("eth_getBlockByHash"))
    }

    async fn transaction_count(&self, block_hash: B256) -> Result<u64, ChainError> {
        self.lookup("eth_getBlockTransactionCountByHash").await?;
        self.blocks
            .lock()
            .unwrap()
            .get(&block_hash)
            .map(|b| b.transactions.len() as u64)
            .ok_or_else(|| Self::not_found("eth_getBlockTransactionCountByHash"))
    }

    async fn balance_of(&self, address: Address) -> Result<U256, ChainError> {
        if let Some(reason) = self.balance_failure.lock().unwrap().clone() {
            return Err(ChainError::Upstream {
                method: "eth_getBalance".into(),
                reason,
            });
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn subscribe_new_headers(&self) -> Result<Subscription<Header>, ChainError> {
        if let Some(reason) = self.subscribe_failure.lock().unwrap().clone() {
            return Err(ChainError::Subscription(reason));
        }

        let (items_tx, items_rx) = mpsc::channel(FEED_CAPACITY);
        let (error_tx, error_rx) = oneshot::channel();
        self.feeds.lock().unwrap().push_back(HeaderFeed {
            items: items_tx,
            error: Some(error_tx),
        });

        let active = Arc::clone(&self.active_subscriptions);
        let id = active.fetch_add(1, Ordering::SeqCst);
        let raw = RawSubscription::new(SubscriptionId(format!("{id:#x}")), items_rx, error_rx)
            .on_release(move |_| {
                active.fetch_sub(1, Ordering::SeqCst);
            });
        Ok(Subscription::from_raw(raw))
    }
}

// ─── MockConnector ────────────────────────────────────────────────────────────

/// A [`Connector`] that hands out one shared [`MockChain`].
pub struct MockConnector {
    chain: Arc<MockChain>,
    failure: Option<String>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            failure: None,
            connects: AtomicUsize::new(0),
        }
    }

    /// Refuse every connection attempt.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, ChainError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(reason) => Err(ChainError::Connection {
                endpoint: self.endpoint().to_string(),
                reason: reason.clone(),
            }),
            None => Ok(Arc::clone(&self.chain) as Arc<dyn ChainClient>),
        }
    }

    fn endpoint(&self) -> &str {
        "mock://chain"
    }
}
