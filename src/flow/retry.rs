//! Backoff schedule for dialogue backend calls

use std::time::Duration;

/// How many times, and how patiently, a reply is requested
///
/// `max_attempts` counts every call including the first, so the default of 3
/// means one call plus two retries. There is a single client per robot, so
/// pauses are deterministic rather than jittered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Calls per reply before giving up
    pub max_attempts: u32,
    /// Pause after the first failed call
    pub base_delay: Duration,
    /// Longest pause between two calls
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Whether another call may follow `calls_made` failed ones
    ///
    /// The first call is always allowed, even with `max_attempts` at zero.
    #[must_use]
    pub fn allows_another(&self, calls_made: u32) -> bool {
        calls_made < self.max_attempts.max(1)
    }

    /// Pause after the `failures`-th failed call in a row
    ///
    /// One failure waits `base_delay`; every further failure doubles the
    /// pause until it reaches `max_delay`.
    #[must_use]
    pub fn pause_after(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1 << doublings)
            .map_or(self.max_delay, |pause| pause.min(self.max_delay))
    }
}
