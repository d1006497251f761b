//! The Beacon ingestion server.
//!
//! Browsers post batches of telemetry events to `POST /api/telemetry/`. Every request passes
//! through these stages:
//!
//!  1. **Admission**: a per-client token bucket rejects floods with `429 Too Many Requests`
//!     before the body is read.
//!  2. **Validation**: the body is checked against size limits and the event schema. Invalid
//!     events and metadata fields are dropped individually; unusable payloads are rejected with
//!     `400 Bad Request` and a reason code.
//!  3. **Sampling**: each remaining event is kept with the configured probability.
//!  4. **Export**: the batch is handed to the [`MetricsExporter`], which records counters and
//!     histograms with bounded labels on a [`MetricsBackend`] in the background.
//!
//! The response, `202 Accepted`, never waits for the export.
//!
//! Use [`run`] to start the server with a configuration, or assemble the parts with
//! [`ServiceState`], [`make_app`] and [`HttpServer`].
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use beacon_config::Config;

mod constants;
mod endpoints;
mod extractors;
mod middlewares;
mod service;
mod services;
mod statsd;
mod utils;

pub mod metrics;

#[cfg(test)]
mod testutils;

pub use self::endpoints::BadTelemetryRequest;
pub use self::metrics::{BackendError, MetricLabelSet, MetricsBackend, NoopBackend, StatsdBackend};
pub use self::service::*;
pub use self::services::exporter::{ExportOutcome, MetricsExporter};
pub use self::services::server::{App, HttpServer, ServerError, make_app, shutdown_signal};

/// Runs the server until the process is signaled to shut down.
///
/// This creates a multi-threaded tokio runtime, binds the listen address, and blocks until a
/// `SIGINT` or `SIGTERM` has been received and open connections are drained.
pub fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("beacon-server")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let backend = service::create_backend(&config);
        let service = ServiceState::new(config.clone(), backend)?;

        let vacuum = tokio::spawn(vacuum_rate_limits(service.clone()));
        let server = HttpServer::new(config, service)?;
        let result = server.run(shutdown_signal()).await;
        vacuum.abort();

        result?;
        beacon_log::info!("server shut down");
        Ok(())
    })
}

/// Periodically evicts idle rate limit buckets.
async fn vacuum_rate_limits(service: ServiceState) {
    let interval = service.config().rate_limits().vacuum_interval();
    let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        service.rate_limiter().try_vacuum(Instant::now());
    }
}
