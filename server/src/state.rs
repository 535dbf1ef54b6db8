//! Shared handler state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ethstream_core::client::Connector;
use ethstream_core::pipeline::{BlockStreamPipeline, PipelineConfig};
use ethstream_core::snapshot::{Snapshot, SnapshotConfig};

#[derive(Clone)]
pub struct AppState {
    pub snapshot: Snapshot,
    pub pipeline: BlockStreamPipeline,
    /// Process-wide shutdown. Each stream runs on a child of this token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        connector: Arc<dyn Connector>,
        pipeline: PipelineConfig,
        snapshot: SnapshotConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            snapshot: Snapshot::new(Arc::clone(&connector), snapshot),
            pipeline: BlockStreamPipeline::new(connector, pipeline),
            shutdown,
        }
    }
}
