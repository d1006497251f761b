use beacon_statsd::{CounterMetric, DistributionMetric};

pub enum ClientCounters {
    /// Number of events rejected by the buffer because it was full.
    BufferOverflow,
    /// Number of finished flushes.
    ///
    /// This metric is tagged with:
    ///  - `outcome`: `sent`, `rejected`, `exhausted` or `unload`.
    Flushes,
    /// Number of events lost after a failed flush, tagged by `reason`.
    EventsDropped,
}

impl CounterMetric for ClientCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::BufferOverflow => "client.buffer.overflow",
            Self::Flushes => "client.flushes",
            Self::EventsDropped => "client.events.dropped",
        }
    }
}

pub enum ClientDistributions {
    /// Number of send attempts needed for one batch.
    SendAttempts,
}

impl DistributionMetric for ClientDistributions {
    fn name(&self) -> &'static str {
        match self {
            Self::SendAttempts => "client.send.attempts",
        }
    }
}
