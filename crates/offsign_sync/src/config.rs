//! Configuration for the synchronizer.

use std::time::Duration;

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval of the periodic sweep that re-invokes the sync pass while
    /// the queue is non-empty, online, and idle.
    pub sweep_interval: Duration,
    /// Delay used to coalesce a burst of local signature writes into one
    /// sync attempt.
    pub debounce: Duration,
    /// Retry ceiling and advisory backoff parameters.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default timings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            debounce: Duration::from_millis(1500),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the debounce delay.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry ceiling and backoff parameters.
///
/// The computed exponential delay is advisory: it is recorded for
/// diagnostics on each failure, but the fixed sweep interval alone decides
/// when the next attempt happens.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after which a submission becomes terminal and is excluded
    /// from automatic sweeps until the user clears it.
    pub max_attempts: u32,
    /// Base delay for the backoff computation.
    pub initial_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Multiplier for exponential growth.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with the given ceiling.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Computed backoff for a 1-indexed attempt count:
    /// `initial × multiplier^(attempts−1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
