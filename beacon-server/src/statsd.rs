use beacon_statsd::{CounterMetric, DistributionMetric, GaugeMetric, TimerMetric};

pub enum BeaconGauges {
    /// The number of connections currently being managed by the HTTP server.
    ServerActiveConnections,
}

impl GaugeMetric for BeaconGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::ServerActiveConnections => "server.http.connections",
        }
    }
}

pub enum BeaconDistributions {
    /// The `Content-Length` of incoming HTTP requests, in bytes.
    ///
    /// This metric is tagged with:
    ///  - `route`: The matched route.
    ///  - `status_code`: The HTTP status code of the response.
    ContentLength,
    /// Number of events in a batch after validation.
    BatchSize,
}

impl DistributionMetric for BeaconDistributions {
    fn name(&self) -> &'static str {
        match self {
            Self::ContentLength => "requests.content_length",
            Self::BatchSize => "ingest.batch.size",
        }
    }
}

pub enum BeaconTimers {
    /// Total time spent handling a request, tagged by `route`, `method` and `status_code`.
    RequestsDuration,
    /// Time spent exporting one batch to the metrics backend, tagged by `outcome`.
    ExportDuration,
}

impl TimerMetric for BeaconTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::RequestsDuration => "requests.duration",
            Self::ExportDuration => "export.duration",
        }
    }
}

pub enum BeaconCounters {
    /// Number of HTTP requests reaching the server.
    ///
    /// This metric is tagged with:
    ///  - `route`: The matched route, or `unknown`.
    ///  - `method`: The HTTP method.
    ///  - `status_code`: The HTTP status code of the response.
    Requests,
    /// Number of ingest requests by outcome.
    ///
    /// The `outcome` tag is `accepted`, `rate_limited`, or the reason code of a validation error.
    IngestRequests,
    /// Number of events dropped during validation, tagged by `reason`.
    EventsDropped,
    /// Number of metadata fields dropped during validation, tagged by `reason`.
    MetadataFieldsDropped,
    /// Number of events passed on to the exporter.
    EventsAccepted,
    /// Number of finished batch exports, tagged by `outcome`.
    Exports,
    /// Number of batches dropped because too many exports were in flight.
    ExportsDropped,
    /// Counted when the HTTP server starts.
    ServerStarting,
}

impl CounterMetric for BeaconCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::IngestRequests => "ingest.requests",
            Self::EventsDropped => "ingest.events.dropped",
            Self::MetadataFieldsDropped => "ingest.metadata.dropped",
            Self::EventsAccepted => "ingest.events.accepted",
            Self::Exports => "export.batches",
            Self::ExportsDropped => "export.batches.dropped",
            Self::ServerStarting => "server.starting",
        }
    }
}
