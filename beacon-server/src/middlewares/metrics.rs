use std::time::Instant;

use axum::RequestExt;
use axum::extract::{MatchedPath, Request};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use beacon_statsd::metric;

use crate::statsd::{BeaconCounters, BeaconDistributions, BeaconTimers};

/// A middleware that records request counts, durations and content lengths.
///
/// Use this with [`axum::middleware::from_fn`].
pub async fn metrics(mut request: Request, next: Next) -> Response {
    let start = Instant::now();

    let matched_path = request.extract_parts::<MatchedPath>().await;
    let route = matched_path.as_ref().map_or("unknown", |m| m.as_str()).to_owned();
    let method = request.method().clone();

    let content_length = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    let response = next.run(request).await;
    let status_code = response.status();

    metric!(
        counter(BeaconCounters::Requests) += 1,
        route = &route,
        method = method.as_str(),
        status_code = status_code.as_str(),
    );
    metric!(
        timer(BeaconTimers::RequestsDuration) = start.elapsed(),
        route = &route,
        method = method.as_str(),
        status_code = status_code.as_str(),
    );
    if let Some(content_length) = content_length {
        metric!(
            distribution(BeaconDistributions::ContentLength) = content_length,
            route = &route,
            status_code = status_code.as_str(),
        );
    }

    response
}
