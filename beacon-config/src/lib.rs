//! Configuration for the Beacon CLI and server.
//!
//! The configuration is read from `config.yml` in the config directory. Every section and field
//! has a default, so a missing file is equivalent to an empty one. Selected values can be
//! overridden from the command line or the environment through [`OverridableConfig`].
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 3000
//! ingest:
//!   sample_rate: 0.5
//! rate_limits:
//!   capacity: 40
//!   refill_rate: 4
//! ```
#![warn(missing_docs)]

mod config;

pub use beacon_log::{Level, LogConfig, LogFormat, SentryConfig};
pub use beacon_normalization::NormalizationConfig;
pub use beacon_quotas::RateLimitConfig;

pub use self::config::*;
