//! Per-client token-bucket rate limiting with idle-client eviction.

mod bucket;
mod janitor;
mod limiter;
mod policy;

pub use bucket::TokenBucket;
pub use janitor::Janitor;
pub use limiter::RateLimiter;
pub use policy::{
    RateLimitPolicy, DEFAULT_BURST_SIZE, DEFAULT_CLEANUP_INTERVAL, DEFAULT_IDLE_MULTIPLIER,
    DEFAULT_REQUESTS_PER_SECOND,
};
