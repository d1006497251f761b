//! Conversion of telemetry events into exported metrics.
//!
//! Every accepted event results in one or two metric updates on a [`MetricsBackend`], labeled
//! with a bounded [`MetricLabelSet`].

mod backend;
mod labels;

pub use self::backend::*;
pub use self::labels::*;

/// Histogram of web vital magnitudes.
pub const WEB_VITAL_HISTOGRAM: &str = "web_vital";
/// Histogram of route transition durations in milliseconds.
pub const ROUTE_TRANSITION_HISTOGRAM: &str = "route_transition";
/// Counter of route transitions.
pub const ROUTE_TRANSITION_COUNTER: &str = "route_transitions";
/// Counter of client runtime errors.
pub const RUNTIME_ERROR_COUNTER: &str = "runtime_errors";

/// Upper bound of the error count a single runtime-error event may contribute.
pub const MAX_ERROR_COUNT: u64 = 100;

/// Converts the value of a runtime-error event into a counter increment.
///
/// Every event counts at least once; the reported value is rounded and capped at
/// [`MAX_ERROR_COUNT`].
pub fn error_count(value: f64) -> u64 {
    if value.is_finite() {
        value.round().clamp(1.0, MAX_ERROR_COUNT as f64) as u64
    } else {
        1
    }
}
