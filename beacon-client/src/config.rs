use std::time::Duration;

use beacon_normalization::NormalizationConfig;
use beacon_sampling::SamplingConfig;
use serde::{Deserialize, Serialize};
use url::Url;

/// The endpoint events are posted to when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api/telemetry/";

/// Configuration of a [`TelemetryClient`](crate::TelemetryClient).
///
/// All durations are given in milliseconds.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// URL of the ingest endpoint.
    pub endpoint: Url,
    /// Number of buffered events that triggers a flush. Also the largest batch sent at once.
    pub flush_size: usize,
    /// Interval between periodic flushes.
    pub flush_interval_ms: u64,
    /// Hard capacity of the buffer. Events recorded while it is full are dropped.
    pub max_buffered: usize,
    /// Number of retries after the first failed send of a batch.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay between retries.
    pub max_backoff_ms: u64,
    /// Timeout of a single HTTP request.
    pub request_timeout_ms: u64,
    /// Client-side sampling.
    pub sampling: SamplingConfig,
    /// Route templates applied before events are buffered.
    pub normalization: NormalizationConfig,
}

impl ClientConfig {
    /// Returns the interval between periodic flushes.
    ///
    /// A configured interval of zero flushes as often as the timer allows.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    /// Returns the delay before the first retry.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Returns the upper bound for retry delays.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Returns the timeout of a single HTTP request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.parse().unwrap(),
            flush_size: 20,
            flush_interval_ms: 5_000,
            max_buffered: 500,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            request_timeout_ms: 10_000,
            sampling: SamplingConfig::default(),
            normalization: NormalizationConfig::default(),
        }
    }
}
