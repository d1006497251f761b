use std::fmt;

use async_trait::async_trait;
use cadence::prelude::*;
use cadence::MetricError;

use crate::metrics::MetricLabelSet;

/// Errors raised by a [`MetricsBackend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No metrics client has been configured for this process.
    #[error("metrics backend is not configured")]
    Unavailable,

    /// The metric could not be handed to the transport.
    #[error("failed to send metric")]
    Send(#[source] MetricError),
}

/// Destination of exported telemetry metrics.
///
/// Implementations must be safe to call concurrently from many export tasks.
#[async_trait]
pub trait MetricsBackend: fmt::Debug + Send + Sync {
    /// Increments the counter `name` with the given labels by `value`.
    async fn increment_counter(
        &self,
        name: &'static str,
        value: u64,
        labels: &MetricLabelSet,
    ) -> Result<(), BackendError>;

    /// Records one sample of the histogram `name` with the given labels.
    async fn record_histogram(
        &self,
        name: &'static str,
        value: f64,
        labels: &MetricLabelSet,
    ) -> Result<(), BackendError>;
}

/// Sends telemetry as DogStatsD through the process-wide statsd client.
///
/// Metrics carry the configured prefix and default tags, but bypass the sample rate of internal
/// metrics since events have been sampled already.
#[derive(Debug, Default)]
pub struct StatsdBackend;

#[async_trait]
impl MetricsBackend for StatsdBackend {
    async fn increment_counter(
        &self,
        name: &'static str,
        value: u64,
        labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        let sent = beacon_statsd::with_client(|client| {
            let mut metric = client.count_with_tags(name, value);
            for (key, value) in labels.iter() {
                metric = metric.with_tag(key, value);
            }
            Some(client.try_send_metric(metric))
        });

        match sent {
            Some(result) => result.map_err(BackendError::Send),
            None => Err(BackendError::Unavailable),
        }
    }

    async fn record_histogram(
        &self,
        name: &'static str,
        value: f64,
        labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        let sent = beacon_statsd::with_client(|client| {
            let mut metric = client.histogram_with_tags(name, value);
            for (key, value) in labels.iter() {
                metric = metric.with_tag(key, value);
            }
            Some(client.try_send_metric(metric))
        });

        match sent {
            Some(result) => result.map_err(BackendError::Send),
            None => Err(BackendError::Unavailable),
        }
    }
}

/// Discards all metrics.
#[derive(Debug, Default)]
pub struct NoopBackend;

#[async_trait]
impl MetricsBackend for NoopBackend {
    async fn increment_counter(
        &self,
        _name: &'static str,
        _value: u64,
        _labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn record_histogram(
        &self,
        _name: &'static str,
        _value: f64,
        _labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}
