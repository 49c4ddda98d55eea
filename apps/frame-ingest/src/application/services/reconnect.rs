//! Reconnection Policy
//!
//! Exponential backoff for the event stream. After the `n`-th consecutive
//! failure the stream waits `min(base * multiplier^n, max_delay)`, so with
//! the default doubling the first wait is twice the base delay.
//! A failure that brings the consecutive-failure count to `max_retries`
//! ends the stream instead of scheduling another attempt.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Unit of the backoff; the first wait is `base_delay * multiplier`.
    pub base_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles the delay each attempt).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%). Zero disables it.
    pub jitter_factor: f64,
    /// Consecutive failures tolerated before giving up (0 = never give up).
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_retries: 5,
        }
    }
}

impl ReconnectConfig {
    /// Create a configuration with doubling backoff and no jitter.
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_retries,
        }
    }

    /// Add jitter to every computed delay.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }
}

/// Backoff state across consecutive connection failures.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    retry_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            retry_count: 0,
        }
    }

    /// Record a failure and get the delay before the next attempt.
    ///
    /// Returns `None` once the failure count reaches `max_retries`.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.retry_count = self.retry_count.saturating_add(1);
        if !self.should_retry() {
            return None;
        }

        let delay = self.backoff(self.retry_count);
        Some(self.apply_jitter(delay).min(self.config.max_delay))
    }

    /// `base * multiplier^exponent`, capped at `max_delay`.
    fn backoff(&self, exponent: u32) -> Duration {
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let base_millis = self.config.base_delay.as_millis() as f64;
        let scaled = (base_millis * self.config.multiplier.powi(exponent)).round();
        let max_millis = self.config.max_delay.as_millis();
        let millis = if scaled.is_nan() || scaled <= 0.0 {
            0
        } else if scaled.is_infinite() {
            max_millis
        } else {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        };
        Duration::from_millis(u64::try_from(millis.min(max_millis)).unwrap_or(u64::MAX))
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.retry_count = 0;
    }

    /// Consecutive failures since the last successful connection.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_retries == 0 || self.retry_count < self.config.max_retries
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = adjusted_millis as u64;
        Duration::from_millis(adjusted)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn policy(base_ms: u64, max_ms: u64, max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            max_retries,
        ))
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test_case(1, 2_000 ; "first failure waits twice the base")]
    #[test_case(2, 4_000 ; "second failure doubles")]
    #[test_case(3, 8_000 ; "third failure")]
    #[test_case(5, 32_000 ; "fifth failure")]
    #[test_case(6, 60_000 ; "capped")]
    #[test_case(40, 60_000 ; "stays capped")]
    fn delay_after_failure(failures: usize, expected_ms: u64) {
        let mut policy = policy(1_000, 60_000, 0);
        let delay = (0..failures).map(|_| policy.next_delay().unwrap()).last().unwrap();
        assert_eq!(delay, Duration::from_millis(expected_ms));
    }

    #[test]
    fn three_refusals_wait_two_four_eight() {
        let mut policy = policy(1_000, 60_000, 5);
        let delays: Vec<_> = (0..3).map(|_| policy.next_delay().unwrap()).collect();
        assert_eq!(delays, [2, 4, 8].map(Duration::from_secs).to_vec());
    }

    #[test]
    fn gives_up_when_failures_reach_max() {
        let mut policy = policy(100, 1_000, 3);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.retry_count(), 2);
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn reset_restores_base_delay() {
        let mut policy = policy(100, 10_000, 3);
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.retry_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(
                ReconnectConfig::new(Duration::from_millis(1_000), Duration::from_secs(10), 0)
                    .with_jitter(0.1),
            );
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((1_800..=2_200).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn unlimited_retries() {
        let mut policy = policy(1, 10, 0);
        for _ in 0..1_000 {
            assert!(policy.next_delay().is_some());
        }
    }
}
