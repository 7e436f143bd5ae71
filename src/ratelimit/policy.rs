//! Rate limit policy: refill rate, burst capacity and eviction cadence.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default sustained rate in requests per second.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 10.0;
/// Default bucket capacity.
pub const DEFAULT_BURST_SIZE: u32 = 20;
/// Default janitor period.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default number of cleanup intervals a client may stay idle before eviction.
pub const DEFAULT_IDLE_MULTIPLIER: u32 = 2;

/// Immutable token-bucket policy shared by every client of a [`RateLimiter`].
///
/// A policy can only be obtained through [`RateLimitPolicy::new`] (or the
/// presets), so any value in circulation has a positive rate, a non-zero
/// burst, a non-zero cleanup interval and a non-zero idle multiplier.
///
/// [`RateLimiter`]: super::RateLimiter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    requests_per_second: f64,
    burst_size: u32,
    cleanup_interval: Duration,
    idle_multiplier: u32,
}

impl RateLimitPolicy {
    /// Build a policy, rejecting values that would make the limiter degenerate.
    pub fn new(
        requests_per_second: f64,
        burst_size: u32,
        cleanup_interval: Duration,
    ) -> Result<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(Error::InvalidPolicy(format!(
                "requests_per_second must be a positive finite number, got {}",
                requests_per_second
            )));
        }
        if burst_size == 0 {
            return Err(Error::InvalidPolicy(
                "burst_size must be at least 1".to_string(),
            ));
        }
        if cleanup_interval.is_zero() {
            return Err(Error::InvalidPolicy(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            requests_per_second,
            burst_size,
            cleanup_interval,
            idle_multiplier: DEFAULT_IDLE_MULTIPLIER,
        })
    }

    /// Stricter preset: 5 requests per second, bursts of 10.
    pub fn strict() -> Self {
        Self {
            requests_per_second: 5.0,
            burst_size: 10,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            idle_multiplier: DEFAULT_IDLE_MULTIPLIER,
        }
    }

    /// Override how many cleanup intervals a client may stay idle.
    pub fn with_idle_multiplier(mut self, idle_multiplier: u32) -> Result<Self> {
        if idle_multiplier == 0 {
            return Err(Error::InvalidPolicy(
                "idle_multiplier must be at least 1".to_string(),
            ));
        }
        self.idle_multiplier = idle_multiplier;
        Ok(self)
    }

    /// Override the cleanup interval.
    pub fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Result<Self> {
        if cleanup_interval.is_zero() {
            return Err(Error::InvalidPolicy(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }
        self.cleanup_interval = cleanup_interval;
        Ok(self)
    }

    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }

    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    pub fn idle_multiplier(&self) -> u32 {
        self.idle_multiplier
    }

    /// How long a client may go unseen before the janitor evicts it.
    pub fn idle_timeout(&self) -> Duration {
        self.cleanup_interval.saturating_mul(self.idle_multiplier)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst_size: DEFAULT_BURST_SIZE,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            idle_multiplier: DEFAULT_IDLE_MULTIPLIER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.requests_per_second(), 10.0);
        assert_eq!(policy.burst_size(), 20);
        assert_eq!(policy.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(policy.idle_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_strict_policy() {
        let policy = RateLimitPolicy::strict();
        assert_eq!(policy.requests_per_second(), 5.0);
        assert_eq!(policy.burst_size(), 10);
        assert_eq!(policy.cleanup_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = RateLimitPolicy::new(rate, 10, Duration::from_secs(1));
            assert!(matches!(result, Err(Error::InvalidPolicy(_))), "rate {rate}");
        }
    }

    #[test]
    fn test_rejects_zero_burst() {
        let result = RateLimitPolicy::new(1.0, 0, Duration::from_secs(1));
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn test_rejects_zero_cleanup_interval() {
        let result = RateLimitPolicy::new(1.0, 1, Duration::ZERO);
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));

        let result = RateLimitPolicy::default().with_cleanup_interval(Duration::ZERO);
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn test_idle_multiplier_override() {
        let policy = RateLimitPolicy::new(1.0, 1, Duration::from_secs(10))
            .unwrap()
            .with_idle_multiplier(3)
            .unwrap();
        assert_eq!(policy.idle_timeout(), Duration::from_secs(30));

        let result = policy.with_idle_multiplier(0);
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));
    }
}
