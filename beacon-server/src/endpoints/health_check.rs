//! A simple health check endpoint.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

#[derive(Serialize)]
struct Status {
    is_healthy: bool,
}

/// The server is healthy as long as it handles requests; it holds no upstream connections.
pub async fn handle() -> impl IntoResponse {
    (StatusCode::OK, Json(Status { is_healthy: true }))
}
