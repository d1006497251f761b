use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

/// Backoff multiplier (1.5 which is 50% increase per backoff).
const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Randomization factor (0 which is no randomization).
const DEFAULT_RANDOMIZATION: f64 = 0.0;

/// A retry interval generator that increases timeouts with exponential backoff.
///
/// The first call to [`next_backoff`](Self::next_backoff) returns a zero duration, so callers
/// can run the first attempt through the same code path as every retry.
#[derive(Debug)]
pub struct RetryBackoff {
    backoff: ExponentialBackoff,
    attempt: usize,
}

impl RetryBackoff {
    /// Creates a new retry backoff with a custom initial interval.
    pub fn with_initial_interval(initial_interval: Duration, max_interval: Duration) -> Self {
        let backoff = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(initial_interval)
            .with_multiplier(DEFAULT_MULTIPLIER)
            .with_randomization_factor(DEFAULT_RANDOMIZATION)
            .with_max_interval(max_interval.max(initial_interval))
            .with_max_elapsed_time(None)
            .build();

        RetryBackoff {
            backoff,
            attempt: 0,
        }
    }

    /// Returns the number of the retry attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns the next backoff duration.
    pub fn next_backoff(&mut self) -> Duration {
        let duration = match self.attempt {
            0 => Duration::ZERO,
            _ => self
                .backoff
                .next_backoff()
                .unwrap_or(self.backoff.max_interval),
        };

        self.attempt += 1;
        duration
    }
}
