//! ethstream-core: chain client contract and block streaming for ethstream.
//!
//! # Overview
//!
//! The core crate holds everything that does not depend on a wire protocol
//! or an HTTP framework:
//!
//! - [`ChainClient`] / [`Connector`] - what the pipeline needs from a node
//! - [`RpcChainClient`] - `ChainClient` over any [`RpcTransport`]
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] - wire types
//! - [`Subscription`] - typed server-push feed with a one-shot release hook
//! - [`enrich`] module - block shaping and wei → ether display
//! - [`pipeline`] module - the cancellable, backpressured live block stream
//! - [`snapshot`] module - one-shot fetch of the chain head
//!
//! Enable the `testing` feature for in-memory doubles ([`testing::MockChain`]).

pub mod client;
pub mod enrich;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod snapshot;
pub mod subscription;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ChainClient, Connector, RpcChainClient};
pub use enrich::{enrich, miner_balance, wei_to_ether, Ether};
pub use error::{ChainError, TransportError};
pub use pipeline::{BlockStream, BlockStreamPipeline, PipelineConfig, PipelineState, StreamExit};
pub use request::{Incoming, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use snapshot::{Snapshot, SnapshotConfig};
pub use subscription::{RawSubscription, Subscription, SubscriptionEvent, SubscriptionId};
pub use transport::{HealthStatus, RpcTransport};
pub use types::{Block, BlockNumber, EnrichedBlock, Header, Transaction};
