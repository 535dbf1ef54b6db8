//! Chain data shapes: headers, blocks, transactions and the enriched response unit.

use std::str::FromStr;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChainError;

// ─── Header ───────────────────────────────────────────────────────────────────

/// An upstream block header.
///
/// The fields the pipeline relies on are typed; everything else the node
/// sends is kept in `extra` and rendered back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Block number.
    #[serde(with = "quantity")]
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Unix timestamp of the block (seconds since epoch).
    #[serde(with = "quantity")]
    pub timestamp: u64,
    /// Coinbase address as sent by the node. Parsed on demand by [`Header::miner_address`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<String>,
    /// Remaining header fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Header {
    /// Decode the miner/coinbase address.
    pub fn miner_address(&self) -> Result<Address, ChainError> {
        let raw = self
            .miner
            .as_deref()
            .ok_or_else(|| ChainError::Decode(format!("block {} has no miner field", self.number)))?;
        Address::from_str(raw)
            .map_err(|e| ChainError::Decode(format!("invalid miner address {raw:?}: {e}")))
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// An upstream transaction, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transaction(pub Value);

impl Transaction {
    /// The transaction hash, if the node included one.
    ///
    /// Blocks fetched without full bodies carry bare hash strings.
    pub fn hash(&self) -> Option<&str> {
        match &self.0 {
            Value::String(s) => Some(s),
            other => other.get("hash").and_then(Value::as_str),
        }
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A header plus its ordered transaction list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> B256 {
        self.header.hash
    }
}

// ─── EnrichedBlock ────────────────────────────────────────────────────────────

/// Response unit pairing a header with its transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedBlock {
    #[serde(rename = "Header")]
    pub header: Header,
    #[serde(rename = "Transactions")]
    pub transactions: Vec<Transaction>,
}

// ─── BlockNumber ──────────────────────────────────────────────────────────────

/// Block selector for `eth_getBlockByNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockNumber {
    Latest,
    Number(u64),
}

impl BlockNumber {
    /// JSON-RPC block tag / quantity.
    pub fn to_param(self) -> Value {
        match self {
            Self::Latest => Value::String("latest".into()),
            Self::Number(n) => Value::String(quantity::encode(n)),
        }
    }
}

impl From<u64> for BlockNumber {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

// ─── Hex quantities ───────────────────────────────────────────────────────────

/// Serde helpers for `0x`-prefixed hex quantities.
pub mod quantity {
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Encode a u64 as a minimal hex quantity (`0x0`, `0x64`, …).
    pub fn encode(n: u64) -> String {
        format!("{n:#x}")
    }

    /// Parse a hex quantity, with or without the `0x` prefix.
    pub fn decode(s: &str) -> Option<u64> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        u64::from_str_radix(digits, 16).ok()
    }

    pub fn serialize<S: Serializer>(n: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(*n))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode(&s).ok_or_else(|| de::Error::custom(format!("invalid hex quantity {s:?}")))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header_json() -> Value {
        json!({
            "number": "0x64",
            "hash": "0x88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406cb6",
            "parentHash": "0xd4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3",
            "timestamp": "0x55ba4224",
            "miner": "0x05a56e2d52c817161883f50c441c3228cfe54d9f",
            "gasUsed": "0x0",
            "baseFeePerGas": null
        })
    }

    #[test]
    fn header_keeps_unknown_fields() {
        let header: Header = serde_json::from_value(header_json()).unwrap();
        assert_eq!(header.number, 100);
        assert_eq!(header.timestamp, 0x55ba4224);
        assert_eq!(header.extra["gasUsed"], "0x0");

        let back = serde_json::to_value(&header).unwrap();
        assert_eq!(back["number"], "0x64");
        assert_eq!(back["gasUsed"], "0x0");
        assert!(back["baseFeePerGas"].is_null());
    }

    #[test]
    fn miner_address_decodes() {
        let header: Header = serde_json::from_value(header_json()).unwrap();
        let miner = header.miner_address().unwrap();
        assert_eq!(
            miner,
            Address::from_str("0x05a56e2d52c817161883f50c441c3228cfe54d9f").unwrap()
        );
    }

    #[test]
    fn miner_address_missing_or_malformed() {
        let mut header: Header = serde_json::from_value(header_json()).unwrap();
        header.miner = None;
        assert!(matches!(header.miner_address(), Err(ChainError::Decode(_))));

        header.miner = Some("0xnot-an-address".into());
        assert!(matches!(header.miner_address(), Err(ChainError::Decode(_))));
    }

    #[test]
    fn block_splits_transactions_from_header() {
        let mut raw = header_json();
        raw["transactions"] = json!([{ "hash": "0xaa" }, "0xbb"]);
        let block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.number(), 100);
        assert_eq!(block.transactions.len(), 2);
        assert!(!block.header.extra.contains_key("transactions"));
        assert_eq!(block.transactions[0].hash(), Some("0xaa"));
        assert_eq!(block.transactions[1].hash(), Some("0xbb"));
    }

    #[test]
    fn enriched_block_uses_response_field_names() {
        let header: Header = serde_json::from_value(header_json()).unwrap();
        let enriched = EnrichedBlock {
            header,
            transactions: vec![Transaction(json!({ "hash": "0x01" }))],
        };
        let v = serde_json::to_value(&enriched).unwrap();
        assert_eq!(v["Header"]["number"], "0x64");
        assert_eq!(v["Transactions"][0]["hash"], "0x01");
    }

    #[test]
    fn block_number_params() {
        assert_eq!(BlockNumber::Latest.to_param(), json!("latest"));
        assert_eq!(BlockNumber::from(255).to_param(), json!("0xff"));
        assert_eq!(quantity::decode("0x0"), Some(0));
        assert_eq!(quantity::decode("zz"), None);
    }
}
