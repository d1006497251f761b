use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_client::{
    ClientConfig, FlushReport, HttpTransport, TelemetryClient, Transport, TransportError,
};
use beacon_config::Config;
use beacon_protocol::{EventBatch, EventKind, Metadata};
use beacon_server::{BackendError, HttpServer, MetricLabelSet, MetricsBackend, ServiceState};
use serde_json::json;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Paths {
    paths: Mutex<Vec<String>>,
    notify: Notify,
}

impl Paths {
    async fn wait_for(&self, count: usize) -> Vec<String> {
        loop {
            let notified = self.notify.notified();
            let paths = self.paths.lock().unwrap().clone();
            if paths.len() >= count {
                return paths;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl MetricsBackend for Paths {
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
        labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        self.paths.lock().unwrap().push(labels.path().as_str().to_owned());
        self.notify.notify_waiters();
        Ok(())
    }
}

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), beacon_server::ServerError>>,
}

impl TestServer {
    fn start(config: serde_json::Value, backend: Arc<dyn MetricsBackend>) -> Self {
        let mut config = config;
        config["server"] = json!({ "port": 0 });
        let config = Arc::new(Config::from_json_value(config).unwrap());

        let service = ServiceState::new(config.clone(), backend).unwrap();
        let server = HttpServer::new(config, service).unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown, receiver) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            receiver.await.ok();
        }));

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: format!("http://{}/api/telemetry/", self.addr).parse().unwrap(),
            max_retries: 0,
            ..ClientConfig::default()
        }
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_client_delivers_to_server() {
    let backend = Arc::new(Paths::default());
    let server = TestServer::start(json!({}), backend.clone());

    let config = server.client_config();
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let client = TelemetryClient::new(config, transport).unwrap();

    client.record(EventKind::WebVital, "/event/42/manage", 2100.0, Metadata::new());
    client.record(
        EventKind::WebVital,
        "/org/acme-2024?tab=members",
        800.0,
        Metadata::new(),
    );

    let report = client.flush().await;
    assert_eq!(report, FlushReport { sent: 2, dropped: 0 });

    let paths = backend.wait_for(2).await;
    assert_eq!(paths, ["/event/:id/manage", "/org/:id"]);

    server.stop().await;
}

#[tokio::test]
async fn test_rejected_batch_carries_code() {
    let server = TestServer::start(json!({}), Arc::new(beacon_server::NoopBackend));
    let transport = HttpTransport::new(&server.client_config()).unwrap();

    let error = transport
        .send(&EventBatch::new(Vec::new()))
        .await
        .unwrap_err();

    match error {
        TransportError::Rejected { status, code } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(code.as_deref(), Some("EMPTY_BATCH"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_throttled_batch_reports_retry_after() {
    let server = TestServer::start(
        json!({ "rate_limits": { "capacity": 1, "refill_rate": 0.1 } }),
        Arc::new(beacon_server::NoopBackend),
    );
    let transport = HttpTransport::new(&server.client_config()).unwrap();

    // The first request takes the only token, even though the batch is refused.
    let first = transport.send(&EventBatch::new(Vec::new())).await;
    assert!(matches!(first, Err(TransportError::Rejected { .. })));

    let error = transport
        .send(&EventBatch::new(Vec::new()))
        .await
        .unwrap_err();
    assert!(error.is_retryable());
    assert_eq!(error.retry_after(), Some(Duration::from_secs(10)));

    server.stop().await;
}
