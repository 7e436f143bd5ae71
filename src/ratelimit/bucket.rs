//! Token bucket with continuous refill.

use tokio::time::Instant;

use super::policy::RateLimitPolicy;

/// Rate limit state for a single client.
///
/// Tokens are tracked as `f64` so that sub-token refills between closely
/// spaced requests accumulate instead of being truncated away.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Available admission credits, always within `[0, burst_size]`
    tokens: f64,
    /// When tokens were last refilled
    last_refill: Instant,
    /// When the client last made a request, admitted or not
    last_seen: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        Self {
            tokens: f64::from(policy.burst_size()),
            last_refill: now,
            last_seen: now,
        }
    }

    /// Refill for the time elapsed since the last check, then try to take one token.
    ///
    /// Returns `true` if the request is admitted.
    pub fn try_acquire(&mut self, policy: &RateLimitPolicy, now: Instant) -> bool {
        self.refill(policy, now);
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Add tokens for the elapsed time, capped at the burst size.
    ///
    /// `last_refill` moves forward even when the caller is about to be denied,
    /// otherwise a run of denials would credit the same interval repeatedly.
    fn refill(&mut self, policy: &RateLimitPolicy, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let capacity = f64::from(policy.burst_size());
        self.tokens = (self.tokens + elapsed * policy.requests_per_second()).min(capacity);
        self.last_refill = now;
    }

    /// Current token balance, as of the last check.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    #[cfg(test)]
    fn with_tokens(policy: &RateLimitPolicy, now: Instant, tokens: f64) -> Self {
        let mut bucket = Self::new(policy, now);
        bucket.tokens = tokens;
        bucket
    }
}
