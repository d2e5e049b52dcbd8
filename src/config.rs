//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of concurrent per-cell store queries in scatter/gather mode.
pub const DEFAULT_PARALLELISM: usize = 8;

/// Retry policy for transient storage faults (throttling, timeouts).
///
/// A transient fault is retried up to `max_attempts` total attempts with
/// exponential backoff starting at `base_delay` and capped at `max_delay`.
/// A fatal fault, or a transient one that exhausts its attempts, aborts
/// the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per store call, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff duration before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(1u32 << retry.min(16));
        delay.min(self.max_delay)
    }
}

/// Tunables for query execution.
///
/// # Example
///
/// ```
/// use geoquery::QueryConfig;
///
/// let config = QueryConfig::default().with_parallelism(16);
/// assert_eq!(config.parallelism, 16);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Concurrent per-cell store queries in scatter/gather mode.
    /// Paginated mode is always sequential and ignores this.
    pub parallelism: usize,

    /// Retry policy for transient storage faults.
    pub retry: RetryPolicy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueryConfig {
    /// Set the scatter/gather parallelism cap (clamped to at least 1).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(10), Duration::from_millis(350));
    }

    #[test]
    fn test_parallelism_floor() {
        let config = QueryConfig::default().with_parallelism(0);
        assert_eq!(config.parallelism, 1);
    }
}
