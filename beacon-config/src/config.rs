use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_log::{Level, LogConfig, SentryConfig};
use beacon_normalization::{NormalizationConfig, PathNormalizer};
use beacon_protocol::ValidationLimits;
use beacon_quotas::RateLimitConfig;
use beacon_sampling::SamplingConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

type BoxedError = Box<dyn Error + Send + Sync + 'static>;

/// Defines the source of a config error.
#[derive(Debug)]
enum ConfigErrorSource {
    /// An error occurring independently.
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<BoxedError>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(cause: E, kind: ConfigErrorKind) -> Self
    where
        E: Into<BoxedError>,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: Some(cause.into()),
        }
    }

    #[inline]
    fn for_field<E>(cause: E, field: &'static str) -> Self
    where
        E: Into<BoxedError>,
    {
        Self::wrap(cause, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => fmt::Display::fmt(&self.kind, f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Serializing the values failed.
    #[error("could not serialize config")]
    CouldNotSerialize,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// An invalid value found while checking a loaded configuration.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ValueError(&'static str);

trait ConfigObject: DeserializeOwned + Serialize + Default {
    /// The basename of the config file, including the extension.
    fn file_name() -> &'static str;

    /// The full path of the config file.
    fn path(base: &Path) -> PathBuf {
        base.join(Self::file_name())
    }

    /// Loads the config file from the given directory.
    ///
    /// A missing file yields the default configuration.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path));
            }
        };

        let deserializer = serde_yaml::Deserializer::from_reader(io::BufReader::new(f));
        serde_path_to_error::deserialize(deserializer)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }
}

/// Values that can be overridden from the command line or the environment.
///
/// All values are raw strings and parsed by [`Config::apply_override`].
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the server binds to.
    pub host: Option<String>,
    /// The port the server binds to.
    pub port: Option<String>,
    /// Probability of keeping an ingested event.
    pub sample_rate: Option<String>,
    /// `true` to drop all events.
    pub kill_switch: Option<String>,
    /// Burst size of the per-client rate limiter.
    pub rate_limit_capacity: Option<String>,
    /// Tokens per second of the per-client rate limiter.
    pub rate_limit_refill_rate: Option<String>,
    /// Address of the statsd server.
    pub statsd_addr: Option<String>,
    /// Log level.
    pub log_level: Option<String>,
    /// Seconds to wait for requests to finish on shutdown.
    pub shutdown_timeout: Option<String>,
}

/// HTTP server options.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Server {
    /// The host the server binds to.
    pub host: IpAddr,
    /// The port the server binds to.
    pub port: u16,
    /// Seconds to wait for in-flight requests on shutdown.
    pub shutdown_timeout: u64,
    /// Size of the TCP listen backlog.
    pub tcp_listen_backlog: u32,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            shutdown_timeout: 10,
            tcp_listen_backlog: 1024,
        }
    }
}

/// Internal metrics reporting.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// Address of the statsd server. Internal metrics are disabled if not set.
    pub statsd: Option<String>,
    /// Prefix of all metric names.
    pub prefix: String,
    /// Tags added to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Tag name for the host name of this instance.
    pub hostname_tag: Option<String>,
    /// Sample rate of internal metrics.
    pub sample_rate: f64,
    /// Pre-aggregate counters and gauges before sending.
    pub aggregate: bool,
    /// Seconds between emitting periodic gauges.
    pub periodic_secs: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "beacon".to_owned(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
            sample_rate: 1.0,
            aggregate: true,
            periodic_secs: 5,
        }
    }
}

/// Hard limits of the ingest endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum request body size in bytes.
    pub max_payload_bytes: usize,
    /// Maximum number of events in one batch.
    pub max_batch_size: usize,
    /// Maximum length of a raw path in bytes.
    pub max_path_length: usize,
    /// Maximum number of concurrently handled requests.
    pub max_connections: usize,
    /// Maximum number of metric exports in flight. Further batches are dropped.
    pub max_concurrent_exports: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 64 * 1024,
            max_batch_size: 50,
            max_path_length: 2048,
            max_connections: 512,
            max_concurrent_exports: 256,
        }
    }
}

/// Where accepted events are exported to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// Export through the statsd client configured in `metrics`.
    #[default]
    Statsd,
    /// Accept events but export nothing.
    None,
}

/// Processing of accepted events.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Ingest {
    /// Probability of keeping an event, between `0.0` and `1.0`.
    pub sample_rate: f64,
    /// Drops all events while still answering requests.
    pub kill_switch: bool,
    /// Milliseconds after which an export is abandoned.
    pub export_timeout_ms: u64,
    /// Seconds an event timestamp may lie in the past.
    pub max_past_secs: u64,
    /// Seconds an event timestamp may lie in the future.
    pub max_future_secs: u64,
    /// The metrics backend.
    pub exporter: ExporterKind,
}

impl Default for Ingest {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            kill_switch: false,
            export_timeout_ms: 250,
            max_past_secs: 24 * 3600,
            max_future_secs: 3600,
            exporter: ExporterKind::Statsd,
        }
    }
}

/// All configuration values, as stored in `config.yml`.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ConfigValues {
    server: Server,
    logging: LogConfig,
    sentry: SentryConfig,
    metrics: Metrics,
    limits: Limits,
    ingest: Ingest,
    rate_limits: RateLimitConfig,
    normalization: NormalizationConfig,
}

impl ConfigObject for ConfigValues {
    fn file_name() -> &'static str {
        "config.yml"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let config = Config {
            values: ConfigValues::load(&path)?,
            path: path.clone(),
        };

        config
            .check()
            .map_err(|e| e.file(ConfigValues::path(&path)))?;
        Ok(config)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config = Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        };

        config.check()?;
        Ok(config)
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let server = &mut self.values.server;

        if let Some(host) = overrides.host {
            server.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            server.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(shutdown_timeout) = overrides.shutdown_timeout {
            server.shutdown_timeout = shutdown_timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "shutdown_timeout"))?;
        }

        let ingest = &mut self.values.ingest;

        if let Some(sample_rate) = overrides.sample_rate {
            ingest.sample_rate = sample_rate
                .parse()
                .map_err(|err| ConfigError::for_field(err, "sample_rate"))?;
        }

        if let Some(kill_switch) = overrides.kill_switch {
            ingest.kill_switch = match kill_switch.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" | "" => false,
                _ => return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("kill_switch")),
            };
        }

        let rate_limits = &mut self.values.rate_limits;

        if let Some(capacity) = overrides.rate_limit_capacity {
            rate_limits.capacity = capacity
                .parse()
                .map_err(|err| ConfigError::for_field(err, "rate_limit_capacity"))?;
        }

        if let Some(refill_rate) = overrides.rate_limit_refill_rate {
            rate_limits.refill_rate = refill_rate
                .parse()
                .map_err(|err| ConfigError::for_field(err, "rate_limit_refill_rate"))?;
        }

        if let Some(statsd_addr) = overrides.statsd_addr {
            self.values.metrics.statsd = Some(statsd_addr).filter(|addr| !addr.is_empty());
        }

        if let Some(log_level) = overrides.log_level {
            self.values.logging.level = log_level
                .parse::<Level>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        self.check()?;
        Ok(self)
    }

    /// Checks values that deserialize fine but cannot be used.
    fn check(&self) -> Result<(), ConfigError> {
        let values = &self.values;

        let invalid = |field: &'static str, reason: &'static str| {
            Err(ConfigError::for_field(ValueError(reason), field))
        };

        if !(0.0..=1.0).contains(&values.ingest.sample_rate) {
            return invalid("ingest.sample_rate", "must be between 0 and 1");
        }

        if !(0.0..=1.0).contains(&values.metrics.sample_rate) {
            return invalid("metrics.sample_rate", "must be between 0 and 1");
        }

        if values.rate_limits.capacity == 0 {
            return invalid("rate_limits.capacity", "must be at least 1");
        }

        if !(values.rate_limits.refill_rate.is_finite() && values.rate_limits.refill_rate > 0.0) {
            return invalid("rate_limits.refill_rate", "must be positive");
        }

        if values.rate_limits.max_buckets == 0 {
            return invalid("rate_limits.max_buckets", "must be at least 1");
        }

        if values.limits.max_batch_size == 0 {
            return invalid("limits.max_batch_size", "must be at least 1");
        }

        if values.limits.max_connections == 0 {
            return invalid("limits.max_connections", "must be at least 1");
        }

        if values.limits.max_concurrent_exports == 0 {
            return invalid("limits.max_concurrent_exports", "must be at least 1");
        }

        PathNormalizer::new(&values.normalization)
            .map_err(|err| ConfigError::for_field(err, "normalization"))?;

        Ok(())
    }

    /// Returns `true` if a config file exists in the given folder.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotSerialize))
    }

    /// Returns the socket address the server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.server.host, self.values.server.port)
    }

    /// Returns the size of the TCP listen backlog.
    pub fn tcp_listen_backlog(&self) -> u32 {
        self.values.server.tcp_listen_backlog
    }

    /// Returns the time to wait for in-flight requests on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.server.shutdown_timeout)
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the Sentry configuration.
    pub fn sentry(&self) -> &SentryConfig {
        &self.values.sentry
    }

    /// Returns the address of the statsd server, if internal metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of all metric names.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the tags added to every metric.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the tag name for the host name of this instance.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns the sample rate of internal metrics.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }

    /// Returns `true` if counters and gauges are aggregated before sending.
    pub fn metrics_aggregate(&self) -> bool {
        self.values.metrics.aggregate
    }

    /// Returns the interval of periodic gauges, `None` if disabled.
    pub fn metrics_periodic_interval(&self) -> Option<Duration> {
        match self.values.metrics.periodic_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Returns the maximum request body size in bytes.
    pub fn max_payload_bytes(&self) -> usize {
        self.values.limits.max_payload_bytes
    }

    /// Returns the maximum number of concurrently handled requests.
    pub fn max_connections(&self) -> usize {
        self.values.limits.max_connections
    }

    /// Returns the maximum number of exports in flight.
    pub fn max_concurrent_exports(&self) -> usize {
        self.values.limits.max_concurrent_exports
    }

    /// Returns the limits for payload validation.
    pub fn validation_limits(&self) -> ValidationLimits {
        let limits = &self.values.limits;
        let ingest = &self.values.ingest;

        ValidationLimits {
            max_payload_bytes: limits.max_payload_bytes,
            max_batch_size: limits.max_batch_size,
            max_path_length: limits.max_path_length,
            max_past: Duration::from_secs(ingest.max_past_secs),
            max_future: Duration::from_secs(ingest.max_future_secs),
        }
    }

    /// Returns the sampling configuration of ingested events.
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            sample_rate: self.values.ingest.sample_rate,
            kill_switch: self.values.ingest.kill_switch,
        }
    }

    /// Returns the time after which an export is abandoned.
    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.values.ingest.export_timeout_ms)
    }

    /// Returns the metrics backend for accepted events.
    pub fn exporter(&self) -> ExporterKind {
        self.values.ingest.exporter
    }

    /// Returns the rate limiter configuration.
    pub fn rate_limits(&self) -> &RateLimitConfig {
        &self.values.rate_limits
    }

    /// Returns the path normalization rules.
    pub fn normalization(&self) -> &NormalizationConfig {
        &self.values.normalization
    }
}
