use beacon_statsd::{CounterMetric, GaugeMetric, TimerMetric};

pub enum QuotaTimers {
    /// Timer for the duration of a bucket vacuum.
    VacuumDuration,
}

impl TimerMetric for QuotaTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::VacuumDuration => "quota.vacuum.duration",
        }
    }
}

pub enum QuotaCounters {
    /// Number of buckets removed by a vacuum.
    Evicted,
    /// Number of new clients throttled because the bucket store was full.
    StoreFull,
}

impl CounterMetric for QuotaCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Evicted => "quota.bucket.evicted",
            Self::StoreFull => "quota.bucket.store_full",
        }
    }
}

pub enum QuotaGauges {
    /// Number of live rate limit buckets after a vacuum.
    Buckets,
}

impl GaugeMetric for QuotaGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::Buckets => "quota.bucket.count",
        }
    }
}
