//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use ethstream_core::error::ChainError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Chain(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Chain(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Chain(e) => tracing::warn!(status = status.as_u16(), kind = e.kind(), error = %e, "request failed"),
            ApiError::Internal(msg) => tracing::error!(error = %msg, "request failed"),
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_504_everything_else_to_502() {
        assert_eq!(
            ApiError::from(ChainError::Timeout { ms: 10 }).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(ChainError::Subscription("gone".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(ChainError::Decode("bad".into())).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
