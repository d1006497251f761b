use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_config::Config;
use tokio::sync::Notify;

use crate::metrics::{BackendError, MetricLabelSet, MetricsBackend};
use crate::service::ServiceState;

/// A metric update received by [`CapturingBackend`].
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Counter {
        name: &'static str,
        value: u64,
        labels: String,
    },
    Histogram {
        name: &'static str,
        value: f64,
        labels: String,
    },
}

impl Record {
    pub fn counter(name: &'static str, value: u64, labels: &str) -> Self {
        Self::Counter {
            name,
            value,
            labels: labels.to_owned(),
        }
    }

    pub fn histogram(name: &'static str, value: f64, labels: &str) -> Self {
        Self::Histogram {
            name,
            value,
            labels: labels.to_owned(),
        }
    }
}

/// Stores every metric update in memory.
#[derive(Debug, Default)]
pub struct CapturingBackend {
    records: Mutex<Vec<Record>>,
    notify: Notify,
}

impl CapturingBackend {
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    /// Waits until at least `count` records have been captured.
    pub async fn wait_for(&self, count: usize) -> Vec<Record> {
        loop {
            let notified = self.notify.notified();
            let records = self.records();
            if records.len() >= count {
                return records;
            }
            notified.await;
        }
    }

    fn push(&self, record: Record) {
        self.records.lock().unwrap().push(record);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl MetricsBackend for CapturingBackend {
    async fn increment_counter(
        &self,
        name: &'static str,
        value: u64,
        labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        self.push(Record::counter(name, value, &labels.to_string()));
        Ok(())
    }

    async fn record_histogram(
        &self,
        name: &'static str,
        value: f64,
        labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        self.push(Record::histogram(name, value, &labels.to_string()));
        Ok(())
    }
}

/// Rejects every metric update.
#[derive(Debug)]
pub struct FailingBackend;

#[async_trait]
impl MetricsBackend for FailingBackend {
    async fn increment_counter(
        &self,
        _name: &'static str,
        _value: u64,
        _labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unavailable)
    }

    async fn record_histogram(
        &self,
        _name: &'static str,
        _value: f64,
        _labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unavailable)
    }
}

/// Never completes a metric update.
#[derive(Debug)]
pub struct HangingBackend;

#[async_trait]
impl MetricsBackend for HangingBackend {
    async fn increment_counter(
        &self,
        _name: &'static str,
        _value: u64,
        _labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        std::future::pending().await
    }

    async fn record_histogram(
        &self,
        _name: &'static str,
        _value: f64,
        _labels: &MetricLabelSet,
    ) -> Result<(), BackendError> {
        std::future::pending().await
    }
}

/// Creates a service state from a JSON config and a backend.
pub fn service_state(config: serde_json::Value, backend: Arc<dyn MetricsBackend>) -> ServiceState {
    let config = Config::from_json_value(config).unwrap();
    ServiceState::new(Arc::new(config), backend).unwrap()
}
