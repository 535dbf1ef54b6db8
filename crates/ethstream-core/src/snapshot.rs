//! One-shot fetch of the chain head with its transactions.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{ChainClient, Connector};
use crate::enrich::{enrich, miner_balance, wei_to_ether};
use crate::error::ChainError;
use crate::pipeline::bounded;
use crate::types::{Block, BlockNumber, EnrichedBlock};

/// Snapshot tuning.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Look up and log the miner's balance for every snapshot.
    pub miner_balance: bool,
    /// Upper bound on each upstream call.
    pub call_timeout: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            miner_balance: true,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Fetches the latest block, logging chain telemetry on the side.
#[derive(Clone)]
pub struct Snapshot {
    connector: Arc<dyn Connector>,
    config: SnapshotConfig,
}

impl Snapshot {
    pub fn new(connector: Arc<dyn Connector>, config: SnapshotConfig) -> Self {
        Self { connector, config }
    }

    /// Latest header → full block by number → enriched block.
    ///
    /// Telemetry lookups only ever log; they cannot fail the snapshot.
    pub async fn latest(&self) -> Result<EnrichedBlock, ChainError> {
        let client = self.connector.connect().await?;
        let limit = Some(self.config.call_timeout);

        let header = bounded(limit, client.latest_header()).await?;
        let block = bounded(
            limit,
            client.block_by_number(BlockNumber::Number(header.number)),
        )
        .await?;

        self.telemetry(client.as_ref(), &block).await;
        Ok(enrich(block))
    }

    async fn telemetry(&self, client: &dyn ChainClient, block: &Block) {
        let limit = Some(self.config.call_timeout);

        match bounded(limit, client.latest_block_number()).await {
            Ok(number) => tracing::info!(number, "latest block number"),
            Err(e) => tracing::warn!(error = %e, "latest block number lookup failed"),
        }

        match bounded(limit, client.transaction_count(block.hash())).await {
            Ok(count) => tracing::info!(number = block.number(), hash = %block.hash(), count, "block transaction count"),
            Err(e) => tracing::warn!(hash = %block.hash(), error = %e, "transaction count lookup failed"),
        }

        if !self.config.miner_balance {
            return;
        }
        match bounded(limit, miner_balance(client, block)).await {
            Ok(wei) => tracing::info!(
                number = block.number(),
                miner = block.header.miner.as_deref().unwrap_or("unknown"),
                balance = %wei_to_ether(wei),
                "miner balance (ether)"
            ),
            Err(e) => tracing::warn!(
                number = block.number(),
                kind = e.kind(),
                error = %e,
                "miner balance lookup failed"
            ),
        }
    }
}
