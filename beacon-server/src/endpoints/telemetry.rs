//! Ingestion of client telemetry batches.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use beacon_common::UnixMillis;
use beacon_protocol::{EventBatch, SizeLimit, ValidationError, ValidationReport};
use beacon_quotas::{Admission, ClientKey};
use beacon_statsd::metric;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::extractors::ClientAddr;
use crate::service::ServiceState;
use crate::statsd::{BeaconCounters, BeaconDistributions};
use crate::utils::ApiErrorResponse;

/// A rejected ingest request.
#[derive(Debug, thiserror::Error)]
pub enum BadTelemetryRequest {
    /// The client exhausted its request budget.
    #[error("too many requests")]
    RateLimited(Duration),

    /// The payload failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The request body could not be received.
    #[error("failed to read request body")]
    ReadBody(#[source] axum::Error),
}

impl BadTelemetryRequest {
    fn outcome(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Invalid(error) => error.reason_code(),
            Self::ReadBody(_) => "MALFORMED",
        }
    }
}

impl IntoResponse for BadTelemetryRequest {
    fn into_response(self) -> Response {
        match self {
            Self::RateLimited(retry_after) => {
                // Whole seconds, rounded up so clients never retry too early.
                let seconds = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, seconds.to_string())],
                )
                    .into_response()
            }
            Self::Invalid(ref error) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::with_code(error.reason_code(), error),
            )
                .into_response(),
            Self::ReadBody(_) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::with_code(self.outcome(), &self),
            )
                .into_response(),
        }
    }
}

/// Handles `POST /api/telemetry/`.
///
/// The client is admitted by the rate limiter before the body is read. Accepted batches are
/// sampled and handed to the exporter, and the request completes without waiting for the export.
pub async fn handle(
    State(state): State<ServiceState>,
    ClientAddr(addr): ClientAddr,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, BadTelemetryRequest> {
    let result = ingest(&state, addr, &headers, body).await;

    let outcome = match &result {
        Ok(()) => "accepted",
        Err(error) => {
            beacon_log::debug!(
                error = error as &dyn std::error::Error,
                outcome = error.outcome(),
                "rejected telemetry request"
            );
            error.outcome()
        }
    };
    metric!(counter(BeaconCounters::IngestRequests) += 1, outcome = outcome);

    result.map(|()| StatusCode::ACCEPTED)
}

async fn ingest(
    state: &ServiceState,
    addr: std::net::IpAddr,
    headers: &HeaderMap,
    body: Body,
) -> Result<(), BadTelemetryRequest> {
    let rate_limits = state.config().rate_limits();
    if rate_limits.enabled {
        let key = ClientKey::new(addr, rate_limits.ipv4_prefix, rate_limits.ipv6_prefix);
        if let Admission::Throttled { retry_after } = state.rate_limiter().admit(key, Instant::now())
        {
            return Err(BadTelemetryRequest::RateLimited(retry_after));
        }
    }

    let limits = state.validation_limits();
    let max_bytes = limits.max_payload_bytes;
    if content_length(headers).is_some_and(|length| length > max_bytes as u64) {
        return Err(ValidationError::TooLarge(SizeLimit::Bytes(max_bytes)).into());
    }

    let body = read_body(body, max_bytes).await?;

    let mut report = ValidationReport::default();
    let result = beacon_protocol::validate_with_report(&body, limits, UnixMillis::now(), &mut report);
    emit_report(&report);
    let batch = result?;

    let sampler = state.sampler();
    let events: Vec<_> = batch
        .into_events()
        .into_iter()
        .filter(|event| sampler.should_sample(event))
        .collect();

    metric!(distribution(BeaconDistributions::BatchSize) = events.len() as u64);
    if events.is_empty() {
        return Ok(());
    }

    metric!(counter(BeaconCounters::EventsAccepted) += events.len() as i64);
    state.exporter().export(EventBatch::new(events));

    Ok(())
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Reads the body, failing as soon as it exceeds `limit` bytes.
///
/// The handler takes the raw [`Body`] instead of `Bytes` under a `DefaultBodyLimit` layer, so
/// that throttled clients are answered before any of their payload is read.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, BadTelemetryRequest> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BadTelemetryRequest::ReadBody)?;
        if buf.len() + chunk.len() > limit {
            return Err(ValidationError::TooLarge(SizeLimit::Bytes(limit)).into());
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

fn emit_report(report: &ValidationReport) {
    for (reason, count) in &report.dropped_events {
        metric!(
            counter(BeaconCounters::EventsDropped) += *count as i64,
            reason = reason.as_str(),
        );
    }

    for (reason, count) in &report.dropped_fields {
        metric!(
            counter(BeaconCounters::MetadataFieldsDropped) += *count as i64,
            reason = reason.as_str(),
        );
    }
}
