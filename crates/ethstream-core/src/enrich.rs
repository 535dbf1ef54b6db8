//! Block enricher: response shaping, miner balance lookup and wei → ether display.

use alloy_primitives::U256;
use serde::{Serialize, Serializer};

use crate::client::ChainClient;
use crate::error::ChainError;
use crate::types::{Block, EnrichedBlock};

/// Decimal places between wei and ether.
pub const ETHER_DECIMALS: usize = 18;

/// Pair a block's header with its transactions. Pure and total.
pub fn enrich(block: Block) -> EnrichedBlock {
    EnrichedBlock {
        header: block.header,
        transactions: block.transactions,
    }
}

/// Resolve the balance of the block's miner/coinbase account.
pub async fn miner_balance(client: &dyn ChainClient, block: &Block) -> Result<U256, ChainError> {
    let miner = block.header.miner_address()?;
    client.balance_of(miner).await
}

/// An amount of ether, kept as exact wei.
///
/// Display only: never compare or add `Ether` values, use the wei amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ether {
    wei: U256,
}

impl Ether {
    pub fn wei(&self) -> U256 {
        self.wei
    }
}

/// Convert wei to ether by exact decimal division by 10^18.
pub fn wei_to_ether(wei: U256) -> Ether {
    Ether { wei }
}

impl std::fmt::Display for Ether {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = U256::from(10u64).pow(U256::from(ETHER_DECIMALS));
        let (whole, frac) = self.wei.div_rem(unit);
        if frac.is_zero() {
            return write!(f, "{whole}");
        }
        let frac = format!("{:0>width$}", frac.to_string(), width = ETHER_DECIMALS);
        write!(f, "{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl Serialize for Ether {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::types::{Header, Transaction};
    use alloy_primitives::B256;
    use serde_json::{json, Map};

    fn block(tx_count: usize) -> Block {
        Block {
            header: Header {
                number: 100,
                hash: B256::repeat_byte(1),
                parent_hash: B256::ZERO,
                timestamp: 1_700_000_000,
                miner: Some("0x0000000000000000000000000000000000000001".into()),
                extra: Map::new(),
            },
            transactions: (0..tx_count)
                .map(|i| Transaction(json!({ "nonce": i })))
                .collect(),
        }
    }

    #[test]
    fn enrich_keeps_header_and_order() {
        let b = block(3);
        let enriched = enrich(b.clone());
        assert_eq!(enriched.header, b.header);
        assert_eq!(enriched.transactions, b.transactions);
        assert_eq!(enriched.transactions[2].0["nonce"], 2);
    }

    #[test]
    fn one_ether_is_exact() {
        let wei = U256::from(1_000_000_000_000_000_000u64);
        assert_eq!(wei_to_ether(wei).to_string(), "1");
    }

    #[test]
    fn fractions_keep_leading_zeros() {
        assert_eq!(wei_to_ether(U256::from(1u64)).to_string(), "0.000000000000000001");
        assert_eq!(
            wei_to_ether(U256::from(1_500_000_000_000_000_000u64)).to_string(),
            "1.5"
        );
        assert_eq!(wei_to_ether(U256::ZERO).to_string(), "0");
    }

    #[test]
    fn huge_balances_keep_every_digit() {
        let wei = U256::from(1u64) << 200usize;
        let shown = wei_to_ether(wei).to_string();
        assert_eq!(
            shown,
            "1606938044258990275541962092341162602522202.993782792835301376"
        );
        let significant = shown.chars().filter(char::is_ascii_digit).count();
        assert!(significant >= 50);
    }

    #[test]
    fn max_u256_round_trips_through_display() {
        let shown = wei_to_ether(U256::MAX).to_string();
        let digits: String = shown.chars().filter(|c| *c != '.').collect();
        assert_eq!(U256::from_str(&digits).unwrap(), U256::MAX);
    }

    #[test]
    fn ether_serializes_as_string() {
        let v = serde_json::to_value(wei_to_ether(U256::from(2_000_000_000_000_000_000u64))).unwrap();
        assert_eq!(v, json!("2"));
    }
}
