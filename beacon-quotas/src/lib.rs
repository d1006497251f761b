//! Admission control for the ingest endpoint.
//!
//! Every client is identified by a [`ClientKey`], its address truncated to a network prefix.
//! The [`RateLimiter`] holds one token bucket per key and decides for every request whether it
//! is [`Admission::Allowed`] or [`Admission::Throttled`]. Time is always passed in by the
//! caller, which keeps the limiter deterministic under test.
//!
//! ```
//! use std::time::{Duration, Instant};
//!
//! use beacon_quotas::{Admission, ClientKey, RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(&RateLimitConfig {
//!     capacity: 1,
//!     refill_rate: 1.0,
//!     ..Default::default()
//! });
//!
//! let client = ClientKey::new("203.0.113.7".parse().unwrap(), 32, 64);
//! let now = Instant::now();
//!
//! assert_eq!(limiter.admit(client, now), Admission::Allowed);
//! assert!(!limiter.admit(client, now).is_allowed());
//! assert!(limiter.admit(client, now + Duration::from_secs(1)).is_allowed());
//! ```
#![warn(missing_docs)]

mod config;
mod key;
mod rate_limiter;
mod statsd;

pub use config::*;
pub use key::*;
pub use rate_limiter::*;
