//! HTTP routes.
//!
//! - `GET /transactions` - latest block with its transactions, pretty JSON
//! - `GET /tx-start`     - chunked live stream, one pretty JSON block per chunk
//! - `GET /health`       - liveness

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use ethstream_core::types::EnrichedBlock;

use crate::error::ApiError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/transactions", get(latest_transactions))
        .route("/tx-start", get(stream_transactions))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn latest_transactions(State(state): State<AppState>) -> Result<Response, ApiError> {
    let block = state.snapshot.latest().await?;
    tracing::info!(
        number = block.header.number,
        transactions = block.transactions.len(),
        "snapshot served"
    );
    let body = pretty(&block).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

async fn stream_transactions(State(state): State<AppState>) -> Result<Response, ApiError> {
    let stream = state.pipeline.start(state.shutdown.child_token()).await?;

    // The body owns the stream; a client hang-up drops it and cancels the pipeline.
    let chunks = stream.into_stream().map(|block| chunk(&block));
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(chunks),
    )
        .into_response())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn pretty<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(value)
}

fn chunk(block: &EnrichedBlock) -> Result<Bytes, serde_json::Error> {
    let mut body = pretty(block)?;
    body.push(b'\n');
    Ok(Bytes::from(body))
}
