//! Retry policy for course fetches
//!
//! Kept separate from the transport so the attempt bound and the backoff
//! schedule can be tested without any I/O.

use std::time::Duration;

use super::source::FetchError;

/// Default number of attempts per refresh (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff unit; attempt `n` is followed by a delay of `n` units
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Bounded retry with linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one
    pub max_attempts: u32,
    /// Delay unit multiplied by the attempt number
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Whether another attempt should follow the failed `attempt` (1-based)
    ///
    /// Authentication failures are never retried: no amount of waiting
    /// produces a session token.
    pub fn should_retry(&self, attempt: u32, error: &FetchError) -> bool {
        if error.is_auth() {
            return false;
        }
        attempt < self.max_attempts
    }

    /// Delay to wait after the failed `attempt` (1-based) before the next one
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}
