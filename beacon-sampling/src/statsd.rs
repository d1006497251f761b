use beacon_statsd::CounterMetric;

pub enum SamplingCounters {
    /// Number of sampling decisions.
    ///
    /// This metric is tagged with:
    ///  - `decision`: `keep` or `drop`.
    ///  - `kind`: The event kind.
    Decision,
}

impl CounterMetric for SamplingCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Decision => "sampling.decision",
        }
    }
}
