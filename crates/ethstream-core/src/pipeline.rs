//! The live block stream pipeline.
//!
//! ```text
//! Connector ──► ChainClient::subscribe_new_headers
//!                    │  Header
//!                    ▼
//!          coordination task (one per stream)
//!            reserve slot → block_by_hash → enrich
//!                    │  EnrichedBlock
//!                    ▼
//!          mpsc(1) delivery channel ──► BlockStream (single reader)
//! ```
//!
//! # States
//! `Starting → Streaming → Draining → Closed`. A failure while starting
//! returns the error and spawns nothing. Every other exit goes through
//! `Draining`, which closes the delivery channel and releases the
//! subscription exactly once.
//!
//! # Backpressure
//! The task reserves a delivery slot *before* resolving a block, so at most
//! one resolved block is ever waiting on the consumer. A stalled consumer
//! stalls resolution; headers queue in the subscription's own buffer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::client::{ChainClient, Connector};
use crate::enrich::enrich;
use crate::error::ChainError;
use crate::subscription::{Subscription, SubscriptionEvent};
use crate::types::{EnrichedBlock, Header};

/// Delivery channel capacity. Tokio channels cannot be zero-sized.
const DELIVERY_CAPACITY: usize = 1;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on a single block resolution. Expiry ends the stream.
    pub call_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Lifecycle of one streaming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Streaming,
    Draining,
    Closed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a pipeline stopped.
#[derive(Debug)]
pub enum StreamExit {
    /// The cancellation token fired (shutdown, timeout, explicit cancel).
    Cancelled,
    /// The reader went away.
    ConsumerGone,
    /// The subscription broke or a block could not be resolved.
    Failed(ChainError),
}

impl StreamExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Builds block streams. Cheap to share across requests.
#[derive(Clone)]
pub struct BlockStreamPipeline {
    connector: Arc<dyn Connector>,
    config: PipelineConfig,
}

impl BlockStreamPipeline {
    pub fn new(connector: Arc<dyn Connector>, config: PipelineConfig) -> Self {
        Self { connector, config }
    }

    /// Connect, subscribe and spawn the coordination task.
    ///
    /// The stream stops when `cancel` fires, when the returned
    /// [`BlockStream`] is dropped, or when the upstream feed fails.
    pub async fn start(&self, cancel: CancellationToken) -> Result<BlockStream, ChainError> {
        let (state_tx, state_rx) = watch::channel(PipelineState::Starting);

        let client = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled_while_starting()),
            res = self.connector.connect() => res.map_err(|e| {
                tracing::warn!(endpoint = %self.connector.endpoint(), error = %e, "block stream connect failed");
                e
            })?,
        };

        let subscription = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled_while_starting()),
            res = client.subscribe_new_headers() => res.map_err(|e| {
                tracing::warn!(endpoint = %self.connector.endpoint(), error = %e, "newHeads subscription failed");
                e
            })?,
        };

        tracing::info!(
            endpoint = %self.connector.endpoint(),
            subscription = %subscription.id(),
            "block stream started"
        );

        let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
        state_tx.send_replace(PipelineState::Streaming);

        let worker = Worker {
            client,
            subscription,
            tx,
            cancel: cancel.clone(),
            state: state_tx,
            call_timeout: self.config.call_timeout,
        };
        let task = tokio::spawn(worker.run());

        Ok(BlockStream {
            rx,
            state: state_rx,
            cancel: cancel.clone(),
            task,
            _guard: cancel.drop_guard(),
        })
    }
}

fn cancelled_while_starting() -> ChainError {
    ChainError::Subscription("cancelled before the subscription was established".into())
}

// ─── Consumer side ────────────────────────────────────────────────────────────

/// The reading end of one pipeline. Dropping it cancels the pipeline.
pub struct BlockStream {
    rx: mpsc::Receiver<EnrichedBlock>,
    state: watch::Receiver<PipelineState>,
    cancel: CancellationToken,
    task: JoinHandle<StreamExit>,
    _guard: DropGuard,
}

impl std::fmt::Debug for BlockStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStream")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl BlockStream {
    /// Next enriched block, or `None` once the pipeline has closed.
    pub async fn next(&mut self) -> Option<EnrichedBlock> {
        self.rx.recv().await
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Ask the pipeline to stop. Blocks already delivered stay readable.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel the pipeline and wait until its task has exited and the
    /// subscription has been released.
    pub async fn close(self) -> StreamExit {
        let BlockStream {
            rx, cancel, task, ..
        } = self;
        cancel.cancel();
        drop(rx);
        match task.await {
            Ok(exit) => exit,
            Err(e) => StreamExit::Failed(ChainError::Subscription(format!(
                "pipeline task failed: {e}"
            ))),
        }
    }

    /// Adapt into a `futures::Stream` that owns the pipeline handle.
    pub fn into_stream(self) -> impl Stream<Item = EnrichedBlock> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            let block = stream.next().await?;
            Some((block, stream))
        })
    }
}

// ─── Coordination task ────────────────────────────────────────────────────────

struct Worker {
    client: Arc<dyn ChainClient>,
    subscription: Subscription<Header>,
    tx: mpsc::Sender<EnrichedBlock>,
    cancel: CancellationToken,
    state: watch::Sender<PipelineState>,
    call_timeout: Option<Duration>,
}

impl Worker {
    async fn run(mut self) -> StreamExit {
        let (exit, delivered) = self.stream().await;

        let Worker {
            mut subscription,
            tx,
            state,
            ..
        } = self;
        state.send_replace(PipelineState::Draining);
        subscription.close();
        state.send_replace(PipelineState::Closed);
        // Readers see end-of-stream only once everything upstream is released.
        drop(tx);

        match &exit {
            StreamExit::Failed(e) => tracing::warn!(
                subscription = %subscription.id(),
                delivered,
                kind = e.kind(),
                error = %e,
                "block stream failed"
            ),
            other => tracing::info!(
                subscription = %subscription.id(),
                delivered,
                reason = ?other,
                "block stream closed"
            ),
        }
        exit
    }

    /// Streaming loop. Returns the exit reason and the number of delivered blocks.
    async fn stream(&mut self) -> (StreamExit, u64) {
        let mut delivered = 0u64;
        loop {
            let header = tokio::select! {
                biased;
                event = self.subscription.next_event() => match event {
                    SubscriptionEvent::Item(header) => header,
                    SubscriptionEvent::Error(e) => return (StreamExit::Failed(e), delivered),
                    SubscriptionEvent::Ended => {
                        let err = ChainError::Subscription("header feed ended".into());
                        return (StreamExit::Failed(err), delivered);
                    }
                },
                _ = self.cancel.cancelled() => return (StreamExit::Cancelled, delivered),
                _ = self.tx.closed() => return (StreamExit::ConsumerGone, delivered),
            };
            tracing::debug!(number = header.number, hash = %header.hash, "new header");

            let permit = tokio::select! {
                biased;
                err = self.subscription.failure() => return (StreamExit::Failed(err), delivered),
                _ = self.cancel.cancelled() => return (StreamExit::Cancelled, delivered),
                permit = self.tx.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return (StreamExit::ConsumerGone, delivered),
                },
            };

            let block = tokio::select! {
                biased;
                err = self.subscription.failure() => return (StreamExit::Failed(err), delivered),
                _ = self.cancel.cancelled() => return (StreamExit::Cancelled, delivered),
                _ = self.tx.closed() => return (StreamExit::ConsumerGone, delivered),
                res = bounded(self.call_timeout, self.client.block_by_hash(header.hash)) => match res {
                    Ok(block) => block,
                    Err(e) => return (StreamExit::Failed(e), delivered),
                },
            };

            tracing::info!(
                number = block.number(),
                hash = %block.hash(),
                miner = block.header.miner.as_deref().unwrap_or("unknown"),
                transactions = block.transactions.len(),
                "block resolved"
            );
            permit.send(enrich(block));
            delivered += 1;
        }
    }
}

pub(crate) async fn bounded<T>(
    limit: Option<Duration>,
    call: impl Future<Output = Result<T, ChainError>>,
) -> Result<T, ChainError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ChainError::Timeout {
                ms: limit.as_millis() as u64,
            })?,
        None => call.await,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
