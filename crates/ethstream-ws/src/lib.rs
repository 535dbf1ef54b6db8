//! ethstream-ws: WebSocket JSON-RPC transport.
//!
//! # Features
//! - Request multiplexing over a single connection
//! - Subscription management (`eth_subscribe` / `eth_unsubscribe`)
//! - Bounded per-subscription buffers; a stalled subscriber is errored,
//!   never silently skipped
//! - No reconnect: a lost link fails every pending call and subscription

pub mod client;
pub mod subscriptions;

pub use client::{WsClientConfig, WsRpcClient};
pub use subscriptions::{Dispatch, SubscriptionManager};
