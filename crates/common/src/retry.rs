//! Exponential backoff policy shared by the payment adapter and background loops.

use std::time::Duration;

/// Retry policy configuration for exponential backoff.
///
/// Defaults: 3 retries, 100ms initial delay, 30s cap, multiplier 2.0.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt. `None` retries forever.
    pub max_retries: Option<usize>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff).
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never gives up.
    pub fn unbounded(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Sets the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Returns true if another retry is allowed after `attempt` failed retries.
    pub fn should_retry(&self, attempt: usize) -> bool {
        self.max_retries.is_none_or(|max| attempt < max)
    }

    /// Calculates the delay for a given attempt number.
    ///
    /// delay = initial_delay * multiplier^attempt, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }
}
