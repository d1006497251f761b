use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use beacon_statsd::metric;
use papaya::{Compute, Operation};

use crate::statsd::{QuotaCounters, QuotaGauges, QuotaTimers};
use crate::{ClientKey, RateLimitConfig};

/// Tolerance for floating point error accumulated during refills.
const EPSILON: f64 = 1e-9;

/// The result of [`RateLimiter::admit`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// The request may proceed.
    Allowed,
    /// The request must be rejected.
    Throttled {
        /// Time until the client's bucket holds a token again.
        retry_after: Duration,
    },
}

impl Admission {
    /// Returns `true` if the request was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Token state of a single client.
#[derive(Clone, Copy, Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-client token bucket rate limiter.
///
/// Each client key owns a bucket holding up to `capacity` tokens that refills continuously at
/// `refill_rate` tokens per second. Refills are computed lazily on every check, there is no
/// background timer. Every admitted request consumes one token.
///
/// Buckets are stored in a concurrent map and updated with compare-and-swap, so checks for
/// different keys never contend. Idle buckets are removed by [`try_vacuum`](Self::try_vacuum),
/// which should be called periodically.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: papaya::HashMap<ClientKey, Bucket>,
    capacity: f64,
    refill_rate: f64,
    bucket_ttl: Duration,
    max_buckets: usize,
    vacuum_interval: Duration,
    /// Reference point for `next_vacuum`.
    epoch: Instant,
    /// Milliseconds since `epoch` at which the next vacuum may run.
    next_vacuum: AtomicU64,
}

impl RateLimiter {
    /// Creates an empty rate limiter.
    ///
    /// A capacity of zero admits nothing. A non-positive refill rate never refills.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: papaya::HashMap::new(),
            capacity: f64::from(config.capacity),
            refill_rate: config.refill_rate.max(0.0),
            bucket_ttl: config.bucket_ttl(),
            max_buckets: config.max_buckets,
            vacuum_interval: config.vacuum_interval(),
            epoch: Instant::now(),
            next_vacuum: AtomicU64::new(0),
        }
    }

    /// Checks whether a request of the client is admitted at time `now`, consuming a token.
    ///
    /// A throttled check leaves the bucket untouched, so a client that keeps retrying during a
    /// burst is not penalized a second time.
    pub fn admit(&self, key: ClientKey, now: Instant) -> Admission {
        let buckets = self.buckets.pin();

        if buckets.len() >= self.max_buckets && buckets.get(&key).is_none() {
            drop(buckets);
            // Sweeps stay debounced here, new keys are throttled until one frees space.
            self.try_vacuum(now);
            if self.buckets.len() >= self.max_buckets {
                metric!(counter(QuotaCounters::StoreFull) += 1);
                return Admission::Throttled {
                    retry_after: self.vacuum_interval,
                };
            }
            return self.admit_unchecked(key, now);
        }

        drop(buckets);
        self.admit_unchecked(key, now)
    }

    fn admit_unchecked(&self, key: ClientKey, now: Instant) -> Admission {
        let buckets = self.buckets.pin();

        let result = buckets.compute(key, |entry| {
            let tokens = match entry {
                Some((_, bucket)) => self.refilled_tokens(bucket, now),
                None => self.capacity,
            };

            if tokens + EPSILON >= 1.0 {
                Operation::Insert(Bucket {
                    tokens: (tokens - 1.0).max(0.0),
                    last_refill: now,
                })
            } else {
                Operation::Abort(self.time_until_token(tokens))
            }
        });

        match result {
            Compute::Aborted(retry_after) => Admission::Throttled { retry_after },
            _ => Admission::Allowed,
        }
    }

    /// Removes idle buckets if the vacuum interval has passed since the last sweep.
    ///
    /// Returns `true` if a sweep was performed.
    pub fn try_vacuum(&self, now: Instant) -> bool {
        let now_ms = self.millis_since_epoch(now);
        let next_vacuum = self.next_vacuum.load(Ordering::Relaxed);

        if next_vacuum > now_ms {
            return false;
        }

        let interval = u64::try_from(self.vacuum_interval.as_millis()).unwrap_or(u64::MAX);
        let exchange = self.next_vacuum.compare_exchange(
            next_vacuum,
            now_ms.saturating_add(interval),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );

        if exchange.is_err() {
            // Another caller is running the sweep.
            return false;
        }

        self.vacuum(now);
        true
    }

    /// Returns the number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no client has a bucket.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn vacuum(&self, now: Instant) {
        let before = self.buckets.len();

        metric!(timer(QuotaTimers::VacuumDuration), {
            let mut buckets = self.buckets.pin();
            buckets.retain(|_, bucket| !self.is_expired(bucket, now));
        });

        let after = self.buckets.len();
        let evicted = before.saturating_sub(after);
        if evicted > 0 {
            beacon_log::debug!(evicted, remaining = after, "evicted idle rate limit buckets");
        }

        metric!(counter(QuotaCounters::Evicted) += evicted as u64);
        metric!(gauge(QuotaGauges::Buckets) = after as u64);
    }

    /// A bucket may go once it has been idle for the TTL and has refilled completely, at which
    /// point it is indistinguishable from a fresh one.
    fn is_expired(&self, bucket: &Bucket, now: Instant) -> bool {
        let idle = now.saturating_duration_since(bucket.last_refill);
        idle >= self.bucket_ttl && self.refilled_tokens(bucket, now) + EPSILON >= self.capacity
    }

    fn refilled_tokens(&self, bucket: &Bucket, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        (bucket.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity)
    }

    fn time_until_token(&self, tokens: f64) -> Duration {
        if self.refill_rate <= 0.0 || self.capacity < 1.0 {
            return self.bucket_ttl.max(Duration::from_secs(1));
        }

        Duration::try_from_secs_f64((1.0 - tokens) / self.refill_rate).unwrap_or(Duration::MAX)
    }

    fn millis_since_epoch(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;

    use similar_asserts::assert_eq;

    use super::*;

    fn config(capacity: u32, refill_rate: f64) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            refill_rate,
            ..Default::default()
        }
    }

    fn key(addr: &str) -> ClientKey {
        ClientKey::from(addr.parse::<IpAddr>().unwrap())
    }

    #[test]
    fn test_burst_then_refill() {
        let limiter = RateLimiter::new(&config(5, 2.0));
        let client = key("203.0.113.1");
        let start = Instant::now();

        for _ in 0..5 {
            assert_eq!(limiter.admit(client, start), Admission::Allowed);
        }

        assert_eq!(
            limiter.admit(client, start),
            Admission::Throttled {
                retry_after: Duration::from_millis(500)
            }
        );

        // One token after 1/R seconds, and exactly one.
        let later = start + Duration::from_millis(500);
        assert_eq!(limiter.admit(client, later), Admission::Allowed);
        assert!(!limiter.admit(client, later).is_allowed());
    }

    #[test]
    fn test_throttled_check_does_not_reset_refill() {
        let limiter = RateLimiter::new(&config(1, 1.0));
        let client = key("203.0.113.1");
        let start = Instant::now();

        assert!(limiter.admit(client, start).is_allowed());

        // Retrying halfway must not push the refill back.
        let half = start + Duration::from_millis(500);
        assert_eq!(
            limiter.admit(client, half),
            Admission::Throttled {
                retry_after: Duration::from_millis(500)
            }
        );

        assert!(limiter.admit(client, start + Duration::from_secs(1)).is_allowed());
    }

    #[test]
    fn test_capacity_caps_refill() {
        let limiter = RateLimiter::new(&config(3, 10.0));
        let client = key("203.0.113.1");
        let start = Instant::now();

        assert!(limiter.admit(client, start).is_allowed());

        let later = start + Duration::from_secs(60);
        let admitted = (0..10)
            .filter(|_| limiter.admit(client, later).is_allowed())
            .count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(&config(1, 1.0));
        let now = Instant::now();

        assert!(limiter.admit(key("203.0.113.1"), now).is_allowed());
        assert!(!limiter.admit(key("203.0.113.1"), now).is_allowed());
        assert!(limiter.admit(key("203.0.113.2"), now).is_allowed());
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_zero_capacity_admits_nothing() {
        let limiter = RateLimiter::new(&config(0, 1.0));
        assert!(!limiter.admit(key("203.0.113.1"), Instant::now()).is_allowed());
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_vacuum_evicts_idle_buckets() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 2,
            refill_rate: 1.0,
            bucket_ttl: 10,
            vacuum_interval: 5,
            ..Default::default()
        });
        let start = Instant::now();

        limiter.admit(key("203.0.113.1"), start);
        limiter.admit(key("203.0.113.2"), start + Duration::from_secs(8));

        let now = start + Duration::from_secs(12);
        assert!(limiter.try_vacuum(now));
        assert_eq!(limiter.len(), 1);

        // Debounced until the interval has passed.
        assert!(!limiter.try_vacuum(now + Duration::from_secs(3)));
        assert!(limiter.try_vacuum(now + Duration::from_secs(30)));
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_vacuum_keeps_buckets_still_refilling() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 100,
            refill_rate: 1.0,
            bucket_ttl: 10,
            ..Default::default()
        });
        let start = Instant::now();
        let client = key("203.0.113.1");

        for _ in 0..100 {
            limiter.admit(client, start);
        }

        // Idle past the TTL, but evicting would hand out 100 fresh tokens.
        limiter.try_vacuum(start + Duration::from_secs(20));
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_store_full_throttles_new_clients() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 5,
            refill_rate: 1.0,
            bucket_ttl: 60,
            vacuum_interval: 30,
            max_buckets: 2,
            ..Default::default()
        });
        let start = Instant::now();

        assert!(limiter.admit(key("203.0.113.1"), start).is_allowed());
        assert!(limiter.admit(key("203.0.113.2"), start).is_allowed());

        assert_eq!(
            limiter.admit(key("203.0.113.3"), start),
            Admission::Throttled {
                retry_after: Duration::from_secs(30)
            }
        );
        // Known clients are unaffected.
        assert!(limiter.admit(key("203.0.113.1"), start).is_allowed());

        // Once the old buckets expire, the forced sweep makes room.
        let later = start + Duration::from_secs(120);
        assert!(limiter.admit(key("203.0.113.3"), later).is_allowed());
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_store_full_sweeps_once_per_interval() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            capacity: 5,
            refill_rate: 1.0,
            bucket_ttl: 60,
            vacuum_interval: 30,
            max_buckets: 2,
            ..Default::default()
        });
        let start = Instant::now();

        assert!(limiter.admit(key("203.0.113.1"), start).is_allowed());
        assert!(limiter.admit(key("203.0.113.2"), start).is_allowed());

        let captures = beacon_statsd::with_capturing_test_client(|| {
            for i in 0..100u8 {
                let client = key(&format!("198.51.100.{i}"));
                assert!(!limiter.admit(client, start).is_allowed());
            }
        });

        let sweeps = captures
            .iter()
            .filter(|line| line.starts_with("quota.vacuum.duration:"))
            .count();
        assert!(sweeps <= 1, "{sweeps} sweeps");

        let rejected = captures
            .iter()
            .filter(|line| line.as_str() == "quota.bucket.store_full:1|c")
            .count();
        assert_eq!(rejected, 100);
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_concurrent_admission() {
        let limiter = Arc::new(RateLimiter::new(&config(100, 0.0)));
        let client = key("203.0.113.1");
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.admit(client, now).is_allowed())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    #[test]
    fn test_vacuum_metrics() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            bucket_ttl: 1,
            ..Default::default()
        });
        let start = Instant::now();
        limiter.admit(key("203.0.113.1"), start);

        let captures = beacon_statsd::with_capturing_test_client(|| {
            limiter.try_vacuum(start + Duration::from_secs(3600));
        });

        assert!(captures.contains(&"quota.bucket.evicted:1|c".to_owned()));
        assert!(captures.contains(&"quota.bucket.count:0|g".to_owned()));
    }
}
