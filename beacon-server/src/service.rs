use std::sync::Arc;

use beacon_config::{Config, ExporterKind};
use beacon_normalization::{NormalizerError, PathNormalizer};
use beacon_protocol::ValidationLimits;
use beacon_quotas::RateLimiter;
use beacon_sampling::Sampler;

use crate::metrics::{MetricsBackend, NoopBackend, StatsdBackend};
use crate::services::exporter::MetricsExporter;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The route templates could not be compiled.
    #[error("could not build the path normalizer")]
    Normalizer(#[from] NormalizerError),
}

/// Returns the metrics backend selected by the configuration.
pub fn create_backend(config: &Config) -> Arc<dyn MetricsBackend> {
    match config.exporter() {
        ExporterKind::Statsd if config.statsd_addr().is_some() => Arc::new(StatsdBackend),
        ExporterKind::Statsd => {
            beacon_log::warn!("no statsd address configured, telemetry will not be exported");
            Arc::new(NoopBackend)
        }
        ExporterKind::None => Arc::new(NoopBackend),
    }
}

#[derive(Debug)]
struct StateInner {
    config: Arc<Config>,
    rate_limiter: RateLimiter,
    sampler: Sampler,
    validation_limits: ValidationLimits,
    exporter: MetricsExporter,
}

/// Server state shared by all request handlers.
///
/// Cloning is cheap.
#[derive(Clone, Debug)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Builds all components from the configuration.
    pub fn new(config: Arc<Config>, backend: Arc<dyn MetricsBackend>) -> Result<Self, ServiceError> {
        let normalizer = PathNormalizer::new(config.normalization())?;
        let exporter = MetricsExporter::new(
            backend,
            normalizer,
            config.export_timeout(),
            config.max_concurrent_exports(),
        );

        Ok(Self {
            inner: Arc::new(StateInner {
                rate_limiter: RateLimiter::new(config.rate_limits()),
                sampler: Sampler::new(&config.sampling()),
                validation_limits: config.validation_limits(),
                exporter,
                config,
            }),
        })
    }

    /// Returns the current config.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the per-client rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    /// Returns the server-side sampler.
    pub fn sampler(&self) -> &Sampler {
        &self.inner.sampler
    }

    /// Returns the limits applied to incoming batches.
    pub fn validation_limits(&self) -> &ValidationLimits {
        &self.inner.validation_limits
    }

    /// Returns the exporter for accepted batches.
    pub fn exporter(&self) -> &MetricsExporter {
        &self.inner.exporter
    }
}
