use std::time::Duration;

use axum::http::{HeaderName, Method};
use tower_http::cors::CorsLayer;

/// Creates the CORS middleware for the ingest endpoint.
///
/// Browsers post telemetry cross-origin. This allows `POST` from any origin and exposes the
/// `Retry-After` header of throttled responses to scripts.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods(Method::POST)
        .allow_headers([
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("origin"),
            HeaderName::from_static("referer"),
            HeaderName::from_static("accept"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("content-encoding"),
        ])
        .allow_origin(tower_http::cors::Any)
        .expose_headers([HeaderName::from_static("retry-after")])
        .max_age(Duration::from_secs(3600))
}
