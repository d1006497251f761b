//! Web server endpoints.
//!
//! Telemetry is ingested at `/api/telemetry/`. The health check endpoints are meant for load
//! balancers and orchestrators.

use axum::Router;
use axum::routing::{get, post};

use crate::middlewares;
use crate::service::ServiceState;

mod health_check;
mod telemetry;

pub use self::telemetry::BadTelemetryRequest;

/// Returns the router with all endpoints.
pub fn routes() -> Router<ServiceState> {
    let ingest = post(telemetry::handle).layer(middlewares::cors());

    Router::new()
        .route("/api/telemetry/", ingest.clone())
        .route("/api/telemetry", ingest)
        .route("/api/health/live/", get(health_check::handle))
        .route("/api/health/ready/", get(health_check::handle))
}
