use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_normalization::PathNormalizer;
use beacon_protocol::{EventBatch, EventKind, TelemetryEvent};
use beacon_statsd::metric;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::metrics::{
    self, BackendError, MetricLabelSet, MetricsBackend, ROUTE_TRANSITION_COUNTER,
    ROUTE_TRANSITION_HISTOGRAM, RUNTIME_ERROR_COUNTER, WEB_VITAL_HISTOGRAM,
};
use crate::statsd::{BeaconCounters, BeaconTimers};

/// The result of a finished export task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExportOutcome {
    /// All events were recorded.
    Success,
    /// At least one metric update failed.
    Failed,
    /// The export did not complete within the timeout and was abandoned.
    TimedOut,
}

impl ExportOutcome {
    /// Returns the name used in metric tags.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
        }
    }
}

/// Hands accepted batches to the metrics backend without blocking the caller.
///
/// Each batch is exported on its own task, bounded by a timeout. Failures are logged and counted,
/// but never surface to the ingest request. The number of exports in flight is limited; batches
/// beyond the limit are dropped.
#[derive(Clone, Debug)]
pub struct MetricsExporter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    backend: Arc<dyn MetricsBackend>,
    normalizer: PathNormalizer,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl MetricsExporter {
    /// Creates an exporter that allows `max_concurrent` exports in flight.
    pub fn new(
        backend: Arc<dyn MetricsBackend>,
        normalizer: PathNormalizer,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                normalizer,
                timeout,
                permits: Arc::new(Semaphore::new(max_concurrent)),
            }),
        }
    }

    /// Spawns the export of a batch and returns immediately.
    ///
    /// Returns `None` if the batch was dropped because too many exports are in flight. The
    /// returned handle may be awaited, but callers are not required to.
    pub fn export(&self, batch: EventBatch) -> Option<JoinHandle<ExportOutcome>> {
        let Ok(permit) = self.inner.permits.clone().try_acquire_owned() else {
            beacon_log::debug!(events = batch.len(), "too many exports in flight, dropping batch");
            metric!(counter(BeaconCounters::ExportsDropped) += 1);
            return None;
        };

        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            let _permit = permit;
            inner.export(batch).await
        }))
    }
}

impl Inner {
    async fn export(&self, batch: EventBatch) -> ExportOutcome {
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.export_batch(&batch)).await {
            Ok(Ok(())) => ExportOutcome::Success,
            Ok(Err(error)) => {
                beacon_log::debug!(
                    error = &error as &dyn std::error::Error,
                    events = batch.len(),
                    "failed to export telemetry"
                );
                ExportOutcome::Failed
            }
            Err(_) => {
                beacon_log::debug!(
                    timeout = ?self.timeout,
                    events = batch.len(),
                    "telemetry export timed out"
                );
                ExportOutcome::TimedOut
            }
        };

        metric!(
            counter(BeaconCounters::Exports) += 1,
            outcome = outcome.as_str(),
        );
        metric!(
            timer(BeaconTimers::ExportDuration) = start.elapsed(),
            outcome = outcome.as_str(),
        );

        outcome
    }

    /// Records all events, continuing past failures. Returns the first error.
    async fn export_batch(&self, batch: &EventBatch) -> Result<(), BackendError> {
        let mut first_error = None;

        for event in batch {
            let labels = MetricLabelSet::new(event, self.normalizer.normalize(event.path()));
            if let Err(error) = self.export_event(event, &labels).await {
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn export_event(
        &self,
        event: &TelemetryEvent,
        labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        let backend = &self.backend;

        match event.kind() {
            EventKind::WebVital => {
                backend
                    .record_histogram(WEB_VITAL_HISTOGRAM, event.value(), labels)
                    .await
            }
            EventKind::RouteTransition => {
                backend
                    .record_histogram(ROUTE_TRANSITION_HISTOGRAM, event.value(), labels)
                    .await?;
                backend
                    .increment_counter(ROUTE_TRANSITION_COUNTER, 1, labels)
                    .await
            }
            EventKind::RuntimeError => {
                let count = metrics::error_count(event.value());
                backend
                    .increment_counter(RUNTIME_ERROR_COUNTER, count, labels)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use beacon_normalization::NormalizationConfig;
    use beacon_protocol::SessionId;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::testutils::{CapturingBackend, FailingBackend, HangingBackend, Record};

    fn exporter(backend: Arc<dyn MetricsBackend>, max_concurrent: usize) -> MetricsExporter {
        let normalizer = PathNormalizer::new(&NormalizationConfig::default()).unwrap();
        MetricsExporter::new(
            backend,
            normalizer,
            Duration::from_millis(250),
            max_concurrent,
        )
    }

    fn batch(events: &[(EventKind, &str, f64)]) -> EventBatch {
        let session_id = SessionId::random();
        EventBatch::new(
            events
                .iter()
                .map(|&(kind, path, value)| TelemetryEvent::new(kind, session_id, path, value))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_metric_selection() {
        let backend = Arc::new(CapturingBackend::default());
        let exporter = exporter(backend.clone(), 4);

        let outcome = exporter
            .export(batch(&[
                (EventKind::WebVital, "/event/42", 1830.5),
                (EventKind::RouteTransition, "/search", 450.0),
                (EventKind::RuntimeError, "/event/7/checkout", 3.0),
            ]))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ExportOutcome::Success);
        assert_eq!(
            backend.records(),
            [
                Record::histogram("web_vital", 1830.5, "kind:web-vital,path:/event/:id,name:other"),
                Record::histogram(
                    "route_transition",
                    450.0,
                    "kind:route-transition,path:/search,bucket:moderate"
                ),
                Record::counter(
                    "route_transitions",
                    1,
                    "kind:route-transition,path:/search,bucket:moderate"
                ),
                Record::counter(
                    "runtime_errors",
                    3,
                    "kind:runtime-error,path:/event/:id/checkout"
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        beacon_log::init_test!();

        let exporter = exporter(Arc::new(FailingBackend), 4);
        let outcome = exporter
            .export(batch(&[(EventKind::WebVital, "/", 1.0)]))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ExportOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out() {
        let exporter = exporter(Arc::new(HangingBackend), 4);
        let outcome = exporter
            .export(batch(&[(EventKind::WebVital, "/", 1.0)]))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ExportOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let exporter = exporter(Arc::new(HangingBackend), 1);

        let first = exporter.export(batch(&[(EventKind::WebVital, "/", 1.0)]));
        assert!(first.is_some());
        assert!(
            exporter
                .export(batch(&[(EventKind::WebVital, "/", 1.0)]))
                .is_none()
        );

        // The permit is returned once the first export is abandoned.
        first.unwrap().await.unwrap();
        assert!(
            exporter
                .export(batch(&[(EventKind::WebVital, "/", 1.0)]))
                .is_some()
        );
    }
}
