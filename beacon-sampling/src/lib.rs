//! Per-event sampling of client telemetry.
//!
//! The [`Sampler`] decides for every single event whether it is processed or dropped. Decisions
//! are independent per event, not per session, so the ingested volume scales linearly with
//! traffic regardless of how long sessions are.
//!
//! ```
//! use beacon_protocol::{EventKind, SessionId, TelemetryEvent};
//! use beacon_sampling::{Sampler, SamplingConfig};
//!
//! let sampler = Sampler::new(&SamplingConfig {
//!     sample_rate: 1.0,
//!     kill_switch: false,
//! });
//!
//! let event = TelemetryEvent::new(EventKind::WebVital, SessionId::random(), "/", 12.0);
//! assert!(sampler.should_sample(&event));
//! ```
#![warn(missing_docs)]

use beacon_protocol::TelemetryEvent;
use beacon_statsd::metric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::statsd::SamplingCounters;

mod statsd;

/// Sampling parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Probability of keeping an event, between `0.0` and `1.0`.
    pub sample_rate: f64,
    /// Drops all events if set.
    pub kill_switch: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            kill_switch: false,
        }
    }
}

/// The outcome of a sampling decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SamplingDecision {
    /// The event is processed.
    Keep,
    /// The event is dropped.
    Drop,
}

impl SamplingDecision {
    /// Returns `true` for [`SamplingDecision::Keep`].
    pub fn is_keep(self) -> bool {
        matches!(self, Self::Keep)
    }

    /// Returns the name used in metric tags.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Drop => "drop",
        }
    }
}

impl From<bool> for SamplingDecision {
    fn from(keep: bool) -> Self {
        if keep { Self::Keep } else { Self::Drop }
    }
}

/// Decides which events are kept.
#[derive(Clone, Debug)]
pub struct Sampler {
    sample_rate: f64,
    kill_switch: bool,
}

impl Sampler {
    /// Creates a sampler. The sample rate is clamped to `0.0..=1.0`; `NaN` counts as zero.
    pub fn new(config: &SamplingConfig) -> Self {
        let sample_rate = if config.sample_rate.is_nan() {
            0.0
        } else {
            config.sample_rate.clamp(0.0, 1.0)
        };

        Self {
            sample_rate,
            kill_switch: config.kill_switch,
        }
    }

    /// The effective sample rate, zero if the kill switch is active.
    pub fn sample_rate(&self) -> f64 {
        if self.kill_switch {
            0.0
        } else {
            self.sample_rate
        }
    }

    /// Returns `true` if the event should be processed, using the thread-local RNG.
    pub fn should_sample(&self, event: &TelemetryEvent) -> bool {
        self.should_sample_with(event, &mut rand::rng())
    }

    /// Returns `true` if the event should be processed, drawing from the given RNG.
    ///
    /// No random number is drawn for rates of exactly zero or one, or if the kill switch is
    /// active.
    pub fn should_sample_with<R>(&self, event: &TelemetryEvent, rng: &mut R) -> bool
    where
        R: Rng + ?Sized,
    {
        let decision = self.decide(rng);

        metric!(
            counter(SamplingCounters::Decision) += 1,
            decision = decision.as_str(),
            kind = event.kind().as_str(),
        );

        decision.is_keep()
    }

    fn decide<R>(&self, rng: &mut R) -> SamplingDecision
    where
        R: Rng + ?Sized,
    {
        let rate = self.sample_rate();
        if rate <= 0.0 {
            SamplingDecision::Drop
        } else if rate >= 1.0 {
            SamplingDecision::Keep
        } else {
            (rng.random::<f64>() < rate).into()
        }
    }
}
