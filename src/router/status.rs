//! Liveness and metrics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::AppState;
use crate::error::ServerError;
use crate::router::ApiResponse;

/// Public health check.
pub async fn health() -> ApiResponse<()> {
    ApiResponse::ok("API is running")
}

/// Prometheus exposition, when a recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Unknown routes.
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
