use std::sync::Arc;

use beacon_common::RetryBackoff;
use beacon_normalization::{NormalizerError, PathNormalizer};
use beacon_protocol::{EventBatch, EventKind, Metadata, SessionId, TelemetryEvent};
use beacon_sampling::Sampler;
use beacon_statsd::metric;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::buffer::{BatchBuffer, Push};
use crate::config::ClientConfig;
use crate::session::SessionIdService;
use crate::statsd::{ClientCounters, ClientDistributions};
use crate::transport::Transport;

/// The result of [`TelemetryClient::record`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordOutcome {
    /// The event is waiting for the next flush.
    Buffered,
    /// The sampler dropped the event.
    SampledOut,
    /// The buffer is at capacity and the event was dropped.
    BufferFull,
}

/// The final state of one batch handed to the transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// The server accepted the batch.
    Sent,
    /// The server refused the batch as invalid. It is not retried.
    Rejected,
    /// All attempts failed.
    Exhausted,
}

impl Delivery {
    /// Returns the name used in metric tags.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Rejected => "rejected",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Totals of one flush.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlushReport {
    /// Number of events the server accepted.
    pub sent: usize,
    /// Number of events lost because their batch could not be delivered.
    pub dropped: usize,
}

impl FlushReport {
    fn add(&mut self, delivery: Delivery, events: usize) {
        match delivery {
            Delivery::Sent => self.sent += events,
            Delivery::Rejected | Delivery::Exhausted => self.dropped += events,
        }
    }
}

/// How often a batch may be sent.
#[derive(Clone, Copy, Debug)]
enum Attempts {
    /// Retry with backoff up to the configured limit.
    Retry,
    /// Send once and give up on any error.
    Once,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    sessions: SessionIdService,
    sampler: Sampler,
    normalizer: PathNormalizer,
    buffer: BatchBuffer,
    transport: Arc<dyn Transport>,
    flush_requested: Notify,
}

/// Records telemetry events and delivers them in batches.
///
/// Events pass the sampler, get their path replaced by its route template and wait in a bounded
/// buffer. A flush starts when the buffer reaches the configured size, when the flush interval
/// elapses, or when [`flush`](Self::flush) is called. Recording never blocks on the network.
///
/// Cloning is cheap and shares the buffer.
#[derive(Clone, Debug)]
pub struct TelemetryClient {
    inner: Arc<Inner>,
}

impl TelemetryClient {
    /// Creates a client delivering through `transport`.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, NormalizerError> {
        let normalizer = PathNormalizer::new(&config.normalization)?;

        Ok(Self {
            inner: Arc::new(Inner {
                sessions: SessionIdService::new(),
                sampler: Sampler::new(&config.sampling),
                buffer: BatchBuffer::new(config.max_buffered),
                normalizer,
                transport,
                flush_requested: Notify::new(),
                config,
            }),
        })
    }

    /// Returns the session id attached to recorded events.
    pub fn session_id(&self) -> SessionId {
        self.inner.sessions.get()
    }

    /// Starts a new session for all events recorded afterwards.
    pub fn rotate_session(&self) -> SessionId {
        self.inner.sessions.rotate()
    }

    /// Returns the number of events waiting for a flush.
    pub fn buffered(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Records an observation of the current session.
    pub fn record(
        &self,
        kind: EventKind,
        path: &str,
        value: f64,
        metadata: Metadata,
    ) -> RecordOutcome {
        let event =
            TelemetryEvent::new(kind, self.session_id(), path, value).with_metadata(metadata);
        self.record_event(event)
    }

    /// Samples, normalizes and buffers an event.
    pub fn record_event(&self, event: TelemetryEvent) -> RecordOutcome {
        let inner = &self.inner;

        if !inner.sampler.should_sample(&event) {
            return RecordOutcome::SampledOut;
        }

        let template = inner.normalizer.normalize(event.path());
        let event = event.with_path(template.as_str());

        match inner.buffer.push(event) {
            Push::Buffered(len) => {
                if len >= inner.config.flush_size {
                    inner.flush_requested.notify_one();
                }
                RecordOutcome::Buffered
            }
            Push::Full => {
                metric!(counter(ClientCounters::BufferOverflow) += 1);
                RecordOutcome::BufferFull
            }
        }
    }

    /// Sends all buffered events, retrying failed batches with backoff.
    ///
    /// The buffer is emptied before the first request, so events recorded during the flush wait
    /// for the next one. Batches that cannot be delivered are dropped.
    pub async fn flush(&self) -> FlushReport {
        self.inner.flush(Attempts::Retry).await
    }

    /// Sends all buffered events once, without retries, and returns immediately.
    ///
    /// This is the last chance to deliver events before the page or process goes away. The
    /// returned handle may be awaited, but callers are not required to.
    pub fn unload(&self) -> JoinHandle<FlushReport> {
        let batches = self.inner.buffer.take_batches(self.inner.config.flush_size);
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.deliver_all(batches, Attempts::Once).await })
    }

    /// Starts the background task that flushes on the interval and size threshold.
    pub fn spawn_flusher(&self) -> FlushTask {
        let (shutdown, receiver) = watch::channel(false);
        let handle = tokio::spawn(self.inner.clone().flush_loop(receiver));

        FlushTask {
            client: self.clone(),
            shutdown,
            handle,
        }
    }
}

impl Inner {
    async fn flush_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,
                _ = ticker.tick() => (),
                _ = self.flush_requested.notified() => (),
            }

            if !self.buffer.is_empty() {
                self.flush(Attempts::Retry).await;
            }
        }
    }

    async fn flush(&self, attempts: Attempts) -> FlushReport {
        let batches = self.buffer.take_batches(self.config.flush_size);
        self.deliver_all(batches, attempts).await
    }

    async fn deliver_all(&self, batches: Vec<EventBatch>, attempts: Attempts) -> FlushReport {
        let mut report = FlushReport::default();

        for batch in batches {
            let delivery = self.deliver(&batch, attempts).await;
            report.add(delivery, batch.len());

            let outcome = match attempts {
                Attempts::Once => "unload",
                Attempts::Retry => delivery.as_str(),
            };
            metric!(counter(ClientCounters::Flushes) += 1, outcome = outcome);
            if delivery != Delivery::Sent {
                metric!(
                    counter(ClientCounters::EventsDropped) += batch.len() as u64,
                    reason = delivery.as_str(),
                );
            }
        }

        report
    }

    async fn deliver(&self, batch: &EventBatch, attempts: Attempts) -> Delivery {
        let max_retries = match attempts {
            Attempts::Retry => self.config.max_retries,
            Attempts::Once => 0,
        };

        let mut backoff = RetryBackoff::with_initial_interval(
            self.config.initial_backoff(),
            self.config.max_backoff(),
        );
        let mut retry_after = None;

        loop {
            let delay = backoff
                .next_backoff()
                .max(retry_after.take().unwrap_or_default());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let error = match self.transport.send(batch).await {
                Ok(()) => {
                    metric!(
                        distribution(ClientDistributions::SendAttempts) = backoff.attempt() as u64
                    );
                    return Delivery::Sent;
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                beacon_log::debug!(
                    error = &error as &dyn std::error::Error,
                    events = batch.len(),
                    "telemetry batch rejected, dropping"
                );
                return Delivery::Rejected;
            }

            if backoff.attempt() > max_retries {
                beacon_log::debug!(
                    error = &error as &dyn std::error::Error,
                    events = batch.len(),
                    attempts = backoff.attempt(),
                    "giving up on telemetry batch"
                );
                return Delivery::Exhausted;
            }

            beacon_log::trace!(
                error = &error as &dyn std::error::Error,
                attempt = backoff.attempt(),
                kind = error.kind(),
                "retrying telemetry batch"
            );
            retry_after = error.retry_after();
            if let Some(requested) = retry_after
                && requested > self.config.max_backoff()
            {
                beacon_log::debug!(
                    retry_after = ?requested,
                    events = batch.len(),
                    "retry requested beyond max backoff, dropping telemetry batch"
                );
                return Delivery::Exhausted;
            }
        }
    }
}

/// Handle to the background flush task started by [`TelemetryClient::spawn_flusher`].
///
/// Dropping the handle stops the task without delivering buffered events.
#[derive(Debug)]
pub struct FlushTask {
    client: TelemetryClient,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushTask {
    /// Stops the task after the flush in progress and sends what is left once.
    pub async fn shutdown(self) -> FlushReport {
        self.shutdown.send_replace(true);
        if let Err(error) = self.handle.await {
            beacon_log::error!(
                error = &error as &dyn std::error::Error,
                "telemetry flush task failed"
            );
        }

        self.client.unload().await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use beacon_protocol::MetadataKey;
    use beacon_sampling::SamplingConfig;
    use reqwest::StatusCode;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::testutils::MockTransport;
    use crate::transport::TransportError;

    fn config() -> ClientConfig {
        ClientConfig {
            flush_size: 3,
            flush_interval_ms: 1_000,
            max_buffered: 10,
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            ..ClientConfig::default()
        }
    }

    fn client(config: ClientConfig, transport: &Arc<MockTransport>) -> TelemetryClient {
        TelemetryClient::new(config, transport.clone()).unwrap()
    }

    fn record(client: &TelemetryClient, path: &str) -> RecordOutcome {
        client.record(EventKind::WebVital, path, 1200.0, Metadata::new())
    }

    fn server_error() -> TransportError {
        TransportError::Server {
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    #[tokio::test]
    async fn test_flush_sends_once() {
        let transport = Arc::new(MockTransport::default());
        let client = client(config(), &transport);

        record(&client, "/event/42");
        record(&client, "/search?q=concerts");

        let report = client.flush().await;
        assert_eq!(report, FlushReport { sent: 2, dropped: 0 });
        assert_eq!(client.flush().await, FlushReport::default());

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        let paths: Vec<_> = batches[0].iter().map(TelemetryEvent::path).collect();
        assert_eq!(paths, ["/event/:id", "/search"]);
    }

    #[tokio::test]
    async fn test_session_and_metadata() {
        let transport = Arc::new(MockTransport::default());
        let client = client(config(), &transport);

        let mut metadata = Metadata::new();
        metadata.insert(MetadataKey::Rating, "good").unwrap();
        client.record(EventKind::WebVital, "/", 1.0, metadata.clone());
        let rotated = client.rotate_session();
        client.record(EventKind::WebVital, "/", 2.0, Metadata::new());
        client.flush().await;

        let batches = transport.batches();
        let events: Vec<_> = batches[0].iter().collect();
        assert_ne!(events[0].session_id(), rotated);
        assert_eq!(events[0].metadata(), &metadata);
        assert_eq!(events[1].session_id(), rotated);
    }

    #[tokio::test]
    async fn test_split_into_batches() {
        let transport = Arc::new(MockTransport::default());
        let client = client(config(), &transport);

        for _ in 0..7 {
            record(&client, "/");
        }
        client.flush().await;

        let sizes: Vec<_> = transport.batches().iter().map(EventBatch::len).collect();
        assert_eq!(sizes, [3, 3, 1]);
    }

    #[tokio::test]
    async fn test_rejected_not_retried() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Err(TransportError::Rejected {
            status: StatusCode::BAD_REQUEST,
            code: Some("SCHEMA_VIOLATION".to_owned()),
        }));
        let client = client(config(), &transport);

        record(&client, "/");
        let report = client.flush().await;

        assert_eq!(report, FlushReport { sent: 0, dropped: 1 });
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let transport = Arc::new(MockTransport::default());
        for _ in 0..10 {
            transport.respond(Err(server_error()));
        }
        let client = client(config(), &transport);

        record(&client, "/");
        let report = client.flush().await;

        // One attempt plus two retries.
        assert_eq!(transport.attempts(), 3);
        assert_eq!(report, FlushReport { sent: 0, dropped: 1 });
        assert_eq!(client.flush().await, FlushReport::default());
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_success() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Err(server_error()));
        let client = client(config(), &transport);

        record(&client, "/");
        let start = tokio::time::Instant::now();
        let report = client.flush().await;

        assert_eq!(report, FlushReport { sent: 1, dropped: 0 });
        assert_eq!(transport.attempts(), 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_honors_retry_after() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Err(TransportError::Throttled {
            retry_after: Some(Duration::from_secs(5)),
        }));
        let client = client(
            ClientConfig {
                max_backoff_ms: 10_000,
                ..config()
            },
            &transport,
        );

        record(&client, "/");
        let start = tokio::time::Instant::now();
        client.flush().await;

        assert_eq!(transport.attempts(), 2);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_batch_on_excessive_retry_after() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Err(TransportError::Throttled {
            retry_after: Some(Duration::from_secs(86_400)),
        }));
        let client = client(config(), &transport);

        record(&client, "/");
        let start = tokio::time::Instant::now();
        let report = client.flush().await;

        assert_eq!(report, FlushReport { sent: 0, dropped: 1 });
        assert_eq!(transport.attempts(), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(client.buffered(), 0);
    }

    #[tokio::test]
    async fn test_buffer_capacity() {
        let transport = Arc::new(MockTransport::default());
        let client = client(
            ClientConfig {
                max_buffered: 2,
                ..config()
            },
            &transport,
        );

        assert_eq!(record(&client, "/"), RecordOutcome::Buffered);
        assert_eq!(record(&client, "/"), RecordOutcome::Buffered);
        assert_eq!(record(&client, "/"), RecordOutcome::BufferFull);
        assert_eq!(client.buffered(), 2);
    }

    #[tokio::test]
    async fn test_kill_switch() {
        let transport = Arc::new(MockTransport::default());
        let client = client(
            ClientConfig {
                sampling: SamplingConfig {
                    sample_rate: 1.0,
                    kill_switch: true,
                },
                ..config()
            },
            &transport,
        );

        assert_eq!(record(&client, "/"), RecordOutcome::SampledOut);
        assert_eq!(client.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_size_threshold() {
        let transport = Arc::new(MockTransport::default());
        let client = client(
            ClientConfig {
                flush_interval_ms: 60_000,
                ..config()
            },
            &transport,
        );
        let task = client.spawn_flusher();

        for _ in 0..3 {
            record(&client, "/");
        }
        tokio::time::timeout(Duration::from_secs(1), transport.wait_for(1))
            .await
            .unwrap();

        assert_eq!(transport.batches().len(), 1);
        assert_eq!(client.buffered(), 0);
        assert_eq!(task.shutdown().await, FlushReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_interval() {
        let transport = Arc::new(MockTransport::default());
        let client = client(config(), &transport);
        let task = client.spawn_flusher();

        record(&client, "/");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.attempts(), 0);

        tokio::time::timeout(Duration::from_secs(1), transport.wait_for(1))
            .await
            .unwrap();
        assert_eq!(transport.batches()[0].len(), 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flusher_with_zero_interval() {
        let transport = Arc::new(MockTransport::default());
        let client = client(
            ClientConfig {
                flush_interval_ms: 0,
                ..config()
            },
            &transport,
        );
        let task = client.spawn_flusher();

        record(&client, "/");
        tokio::time::timeout(Duration::from_secs(1), transport.wait_for(1))
            .await
            .unwrap();

        assert_eq!(client.buffered(), 0);
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_sends_remaining() {
        let transport = Arc::new(MockTransport::default());
        let client = client(
            ClientConfig {
                flush_interval_ms: 60_000,
                ..config()
            },
            &transport,
        );
        let task = client.spawn_flusher();

        record(&client, "/");
        let report = task.shutdown().await;

        assert_eq!(report, FlushReport { sent: 1, dropped: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_single_attempt() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Err(server_error()));
        let client = client(config(), &transport);

        record(&client, "/");
        let handle = client.unload();
        assert_eq!(client.buffered(), 0);

        let report = handle.await.unwrap();
        assert_eq!(report, FlushReport { sent: 0, dropped: 1 });
        assert_eq!(transport.attempts(), 1);
    }
}
