//! A high-level StatsD metric client built on cadence.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first define one of the metric traits on a custom enum.
//! The following types of metrics are available: `counter`, `timer`, `gauge` and `distribution`.
//! Each crate registers its metric names in a `statsd` module:
//!
//! ```
//! use beacon_statsd::{CounterMetric, metric};
//!
//! enum MyCounter {
//!     EventsReceived,
//! }
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Self::EventsReceived => "events.received",
//!         }
//!     }
//! }
//!
//! metric!(counter(MyCounter::EventsReceived) += 1, kind = "web-vital");
//! ```
//!
//! ## Initializing the Client
//!
//! Metrics are only sent after [`init`] has been called. Before that, all `metric!` invocations
//! are no-ops. Tests can capture metrics with [`with_capturing_test_client`].
//!
//! Tag values must be drawn from bounded sets. Never tag a metric with a raw path, a session id
//! or any other client controlled string.
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use cadence::{Metric, MetricBuilder, MetricError, StatsdClient};
use parking_lot::RwLock;
use rand::Rng;
use rand::distr::StandardUniform;
use statsdproxy::cadence::StatsdProxyMetricSink;
use statsdproxy::config::AggregateMetricsConfig;

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// Interval at which aggregated counters and gauges are flushed to the upstream.
const AGGREGATE_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// A sample rate clamped to the range `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate(f64);

impl SampleRate {
    /// Returns the raw rate.
    pub fn get(self) -> f64 {
        self.0
    }
}

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }
}

/// Errors returned by [`init`].
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The statsd address could not be resolved.
    #[error("could not resolve statsd address {0}")]
    Resolve(String, #[source] std::io::Error),
    /// The statsd address resolved to no socket addresses.
    #[error("statsd address {0} resolved to no addresses")]
    NoAddress(String),
}

/// Client configuration used for initialization of the metrics sub system.
#[derive(Debug)]
pub struct MetricsConfig {
    /// Prefix which is appended to all metric names.
    pub prefix: String,
    /// Host of the metrics upstream.
    pub host: String,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate for all emitted metrics.
    pub sample_rate: f64,
    /// Aggregate counters and gauges locally before sending them upstream.
    pub aggregate: bool,
}

/// Client that sends metrics to the configured upstream.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate.
    pub sample_rate: SampleRate,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        let sample_rate = self.sample_rate.get();
        if !Self::should_send(sample_rate) {
            return;
        }

        if sample_rate < 1.0 {
            metric = metric.with_sampling_rate(sample_rate);
        }

        if let Err(error) = self.try_send_metric(metric) {
            beacon_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }

    /// Send a metric with the default tags, bypassing the global sample rate.
    ///
    /// Unlike [`send_metric`](Self::send_metric), errors are returned to the caller.
    pub fn try_send_metric<'a, T>(
        &'a self,
        mut metric: MetricBuilder<'a, '_, T>,
    ) -> Result<(), MetricError>
    where
        T: Metric + From<String>,
    {
        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        metric.try_send().map(drop)
    }

    fn should_send(sample_rate: f64) -> bool {
        if sample_rate <= 0.0 {
            false
        } else if sample_rate >= 1.0 {
            true
        } else {
            let mut rng = rand::rng();
            let s: f64 = rng.sample(StandardUniform);
            s <= sample_rate
        }
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> =
        METRICS_CLIENT.read().clone().into();
}

#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
///
/// Returns all metrics emitted by the function, serialized in the statsd line format.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
        sample_rate: 1.0.into(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

fn resolve(host: &str) -> Result<SocketAddr, MetricsError> {
    host.to_socket_addrs()
        .map_err(|e| MetricsError::Resolve(host.to_owned(), e))?
        .next()
        .ok_or_else(|| MetricsError::NoAddress(host.to_owned()))
}

/// Tell the metrics system to report to statsd.
pub fn init(config: MetricsConfig) -> Result<(), MetricsError> {
    let addr = resolve(&config.host)?;
    beacon_log::info!("reporting metrics to statsd at {addr}");

    let sample_rate = SampleRate::from(config.sample_rate);
    beacon_log::debug!(
        "metrics sample rate is set to {}{}",
        sample_rate.get(),
        if sample_rate.get() == 0.0 {
            ", no metrics will be reported"
        } else {
            ""
        }
    );

    let statsd_client = if config.aggregate {
        let sink = StatsdProxyMetricSink::new(move || {
            let upstream = statsdproxy::middleware::upstream::Upstream::new(addr)
                .expect("failed to create statsdproxy metric sink");

            statsdproxy::middleware::aggregate::AggregateMetrics::new(
                AggregateMetricsConfig {
                    aggregate_gauges: true,
                    aggregate_counters: true,
                    flush_interval: AGGREGATE_FLUSH_INTERVAL,
                    flush_offset: 0,
                    max_map_size: None,
                },
                upstream,
            )
        });
        StatsdClient::from_sink(&config.prefix, sink)
    } else {
        let sink = StatsdProxyMetricSink::new(move || {
            statsdproxy::middleware::upstream::Upstream::new(addr)
                .expect("failed to create statsdproxy metric sink")
        });
        StatsdClient::from_sink(&config.prefix, sink)
    };

    set_client(MetricsClient {
        statsd_client,
        default_tags: config.default_tags,
        sample_rate,
    });

    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time.
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client.
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing distributions.
///
/// A distribution is often used to capture a value that is sampled many times per interval,
/// such as the number of events in a batch.
pub trait DistributionMetric {
    /// Returns the distribution metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement of a value determined by the client, such as
/// the number of live rate limit buckets.
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See the [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // distribution
    (distribution($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.distribution_with_tags(&$crate::DistributionMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                // Reported in milliseconds.
                client.distribution_with_tags(&$crate::TimerMetric::name(&$id), $value.as_nanos() as f64 / 1e6)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}
