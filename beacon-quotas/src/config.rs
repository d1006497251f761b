use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters of the per-client rate limiter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enables admission control. If disabled, all requests are admitted.
    pub enabled: bool,
    /// Maximum number of tokens in a bucket, the size of an instantaneous burst.
    pub capacity: u32,
    /// Tokens added to a bucket per second.
    pub refill_rate: f64,
    /// Seconds a bucket must be idle before it may be evicted.
    pub bucket_ttl: u64,
    /// Minimum seconds between two eviction sweeps.
    pub vacuum_interval: u64,
    /// Maximum number of live buckets.
    pub max_buckets: usize,
    /// Prefix length IPv4 client addresses are truncated to.
    pub ipv4_prefix: u8,
    /// Prefix length IPv6 client addresses are truncated to.
    pub ipv6_prefix: u8,
    /// Derive the client address from the `X-Forwarded-For` header.
    ///
    /// Only enable this behind a proxy that sets the header.
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    /// Returns the bucket TTL as duration.
    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_ttl)
    }

    /// Returns the vacuum interval as duration.
    pub fn vacuum_interval(&self) -> Duration {
        Duration::from_secs(self.vacuum_interval)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 20,
            refill_rate: 2.0,
            bucket_ttl: 300,
            vacuum_interval: 30,
            max_buckets: 100_000,
            ipv4_prefix: 32,
            ipv6_prefix: 64,
            trust_forwarded_for: false,
        }
    }
}
