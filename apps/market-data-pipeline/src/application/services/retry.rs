//! Retry Policy
//!
//! Bounded exponential backoff shared by the pipeline's retry loops. A poll
//! cycle uses it to re-send a quote the broker refused. The reader uses one
//! policy for broker receive errors and another for sink deliveries.
//!
//! Each wait is randomized by up to `jitter_factor` of itself.

use std::time::Duration;

use rand::Rng;

/// Backoff settings for one retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single wait.
    pub max_delay: Duration,
    /// Growth factor applied to the wait after each retry.
    pub multiplier: f64,
    /// Random spread around each wait, as a fraction of it.
    pub jitter_factor: f64,
    /// Retries allowed after the first attempt. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_retries: Some(2),
        }
    }
}

impl RetryConfig {
    /// Settings from explicit values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_retries,
        }
    }

    /// Retries with no wait between attempts.
    #[must_use]
    pub const fn immediate(max_retries: Option<u32>) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_retries,
        }
    }
}

/// Running state of one retry loop.
///
/// ```rust
/// use market_data_pipeline::application::services::retry::{RetryConfig, RetryPolicy};
///
/// let mut send = RetryPolicy::new(RetryConfig::immediate(Some(1)));
/// assert!(send.next_delay().is_some());
/// assert!(send.next_delay().is_none());
///
/// send.reset();
/// assert_eq!(send.retry_count(), 0);
/// ```
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    current_delay: Duration,
    retry_count: u32,
}

impl RetryPolicy {
    /// Start a loop with its full budget.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            retry_count: 0,
        }
    }

    /// Spend one retry and return how long to wait before it.
    ///
    /// Returns `None` once the budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.retry_count += 1;
        let wait = self.apply_jitter(self.current_delay);
        self.current_delay = self.grown(self.current_delay);
        Some(wait)
    }

    /// The wait after `delay`, scaled by the multiplier and capped.
    fn grown(&self, delay: Duration) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = (delay.as_millis() as f64 * self.config.multiplier).round();
        if !scaled.is_finite() || scaled <= 0.0 {
            return Duration::ZERO;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (scaled as u128).min(self.config.max_delay.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Restore the full budget after an attempt succeeds.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.retry_count = 0;
    }

    /// Retries spent since the last reset.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether the budget allows another retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        match self.config.max_retries {
            Some(max) => self.retry_count < max,
            None => true,
        }
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn no_jitter(max_retries: Option<u32>) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_retries,
        }
    }

    #[test]
    fn default_config_values() {
        let config = RetryConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, Some(2));
    }

    #[test]
    fn policy_exponential_backoff() {
        let mut policy = RetryPolicy::new(no_jitter(None));

        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(100));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(200));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(400));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(800));
    }

    #[test]
    fn policy_max_delay_cap() {
        let mut policy = RetryPolicy::new(RetryConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            multiplier: 4.0,
            jitter_factor: 0.0,
            max_retries: None,
        });

        let _ = policy.next_delay();
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(2000));
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(2000));
    }

    #[test]
    fn policy_retry_budget() {
        let mut policy = RetryPolicy::new(no_jitter(Some(2)));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.retry_count(), 2);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut policy = RetryPolicy::new(no_jitter(Some(0)));
        assert!(!policy.should_retry());
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn policy_reset() {
        let mut policy = RetryPolicy::new(no_jitter(Some(3)));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();

        assert_eq!(policy.retry_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn immediate_config_has_no_delay() {
        let mut policy = RetryPolicy::new(RetryConfig::immediate(Some(1)));
        assert_eq!(policy.next_delay(), Some(Duration::ZERO));
        assert_eq!(policy.next_delay(), None);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_bounds(initial_ms in 10u64..10_000) {
            let mut policy = RetryPolicy::new(RetryConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
                jitter_factor: 0.1,
                max_retries: None,
            });

            let millis = policy.next_delay().unwrap().as_millis();
            let low = u128::from(initial_ms) * 9 / 10;
            let high = u128::from(initial_ms) * 11 / 10 + 1;
            prop_assert!(millis >= low.saturating_sub(1), "{millis} below {low}");
            prop_assert!(millis <= high, "{millis} above {high}");
        }
    }
}
