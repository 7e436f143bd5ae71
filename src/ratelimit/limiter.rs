//! Per-client rate limiter registry.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::bucket::TokenBucket;
use super::janitor::Janitor;
use super::policy::RateLimitPolicy;

/// Client identifier to token bucket map, shared with the janitor.
///
/// Each map shard is guarded by its own lock, and both the lookup-or-insert in
/// [`ClientRegistry::allow`] and the per-entry update happen while holding it,
/// so checks for the same client are serialized. Eviction goes through
/// `retain`, which takes the same shard locks.
pub(crate) struct ClientRegistry {
    clients: DashMap<String, TokenBucket>,
    policy: RateLimitPolicy,
}

impl ClientRegistry {
    fn new(policy: RateLimitPolicy) -> Self {
        Self {
            clients: DashMap::new(),
            policy,
        }
    }

    pub(crate) fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    fn allow(&self, client_id: &str, now: Instant) -> bool {
        if let Some(mut bucket) = self.clients.get_mut(client_id) {
            return bucket.try_acquire(&self.policy, now);
        }

        let mut bucket = self
            .clients
            .entry(client_id.to_string())
            .or_insert_with(|| {
                debug!(client_id = %client_id, "Tracking new rate limit client");
                TokenBucket::new(&self.policy, now)
            });
        bucket.try_acquire(&self.policy, now)
    }

    /// Remove every client not seen within the idle timeout. Returns how many were removed.
    pub(crate) fn evict_idle(&self, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(self.policy.idle_timeout()) else {
            return 0;
        };

        let before = self.clients.len();
        self.clients.retain(|_, bucket| bucket.last_seen() >= cutoff);
        before.saturating_sub(self.clients.len())
    }
}

/// The rate limiter that gates requests per client identifier.
///
/// Construct one per server (or per test) and share it as `Arc<RateLimiter>`.
/// Creating a limiter spawns its janitor, so [`RateLimiter::new`] must be
/// called from within a Tokio runtime.
pub struct RateLimiter {
    registry: Arc<ClientRegistry>,
    janitor: Mutex<Option<Janitor>>,
}

impl RateLimiter {
    /// Create a rate limiter and start its idle-eviction sweep.
    pub fn new(policy: RateLimitPolicy) -> Self {
        let registry = Arc::new(ClientRegistry::new(policy));
        let janitor = Janitor::spawn(Arc::clone(&registry));

        info!(
            requests_per_second = policy.requests_per_second(),
            burst_size = policy.burst_size(),
            cleanup_interval_secs = policy.cleanup_interval().as_secs_f64(),
            idle_multiplier = policy.idle_multiplier(),
            "Rate limiter initialized"
        );

        Self {
            registry,
            janitor: Mutex::new(Some(janitor)),
        }
    }

    /// Decide whether a request from `client_id` is admitted.
    ///
    /// Never fails. Unknown clients start with a full bucket.
    pub fn allow(&self, client_id: &str) -> bool {
        let allowed = self.registry.allow(client_id, Instant::now());
        trace!(client_id = %client_id, allowed = allowed, "Checked rate limit");
        allowed
    }

    /// Run one eviction pass now. Returns the number of evicted clients.
    pub fn sweep(&self) -> usize {
        self.registry.evict_idle(Instant::now())
    }

    /// Stop the janitor. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(janitor) = self.janitor.lock().take() {
            janitor.stop();
            info!(
                tracked_clients = self.registry.len(),
                "Rate limiter janitor shut down"
            );
        }
    }

    pub fn is_janitor_running(&self) -> bool {
        self.janitor
            .lock()
            .as_ref()
            .is_some_and(|janitor| janitor.is_running())
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.registry.len()
    }

    /// Whether state exists for `client_id`.
    pub fn contains(&self, client_id: &str) -> bool {
        self.registry.clients.contains_key(client_id)
    }

    /// Remaining tokens for `client_id` as of its last request.
    pub fn tokens(&self, client_id: &str) -> Option<f64> {
        self.registry.clients.get(client_id).map(|b| b.tokens())
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        self.registry.policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    fn policy(rate: f64, burst: u32, cleanup_secs: u64) -> RateLimitPolicy {
        RateLimitPolicy::new(rate, burst, Duration::from_secs(cleanup_secs)).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(RateLimitPolicy::default());
        assert_eq!(limiter.tracked_clients(), 0);
        assert!(limiter.is_janitor_running());
    }

    #[tokio::test]
    async fn test_allow_creates_client() {
        let limiter = RateLimiter::new(policy(1.0, 5, 60));

        assert!(limiter.allow("10.0.0.1"));
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.contains("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_admission() {
        let limiter = RateLimiter::new(policy(1.0, 20, 60));

        for i in 0..20 {
            assert!(limiter.allow("client"), "request {} should be admitted", i + 1);
        }
        assert!(!limiter.allow("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = RateLimiter::new(policy(2.0, 10, 60));
        for _ in 0..10 {
            assert!(limiter.allow("client"));
        }
        assert!(!limiter.allow("client"));

        // 2 tokens/s for 1.5s -> exactly 3 more requests.
        tokio::time::advance(Duration::from_millis(1500)).await;
        for _ in 0..3 {
            assert!(limiter.allow("client"));
        }
        assert!(!limiter.allow("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_burst() {
        let limiter = RateLimiter::new(policy(5.0, 4, 600));
        for _ in 0..4 {
            assert!(limiter.allow("client"));
        }

        tokio::time::advance(Duration::from_secs(100)).await;
        for _ in 0..4 {
            assert!(limiter.allow("client"));
        }
        assert!(!limiter.allow("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_clients_are_independent() {
        let limiter = RateLimiter::new(policy(1.0, 2, 60));

        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        assert!(limiter.allow("b"));
        assert!(limiter.allow("b"));
        assert!(!limiter.allow("b"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_single_token() {
        let limiter = RateLimiter::new(policy(1.0, 1, 60));

        assert!(limiter.allow("client"));
        assert_eq!(limiter.tokens("client"), Some(0.0));
        assert!(!limiter.allow("client"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow("client"));
        assert_eq!(limiter.tokens("client"), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_idle_clients() {
        let limiter = RateLimiter::new(policy(1.0, 5, 10));
        limiter.shutdown();

        limiter.allow("idle");
        tokio::time::advance(Duration::from_secs(15)).await;
        limiter.allow("active");
        tokio::time::advance(Duration::from_secs(6)).await;

        // idle: 21s unseen > 20s timeout; active: 6s unseen.
        assert_eq!(limiter.sweep(), 1);
        assert!(!limiter.contains("idle"));
        assert!(limiter.contains("active"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_client_at_exact_cutoff() {
        let limiter = RateLimiter::new(policy(1.0, 5, 10));
        limiter.shutdown();

        limiter.allow("client");
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.sweep(), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(limiter.sweep(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_evicts_idle_clients() {
        let limiter = RateLimiter::new(policy(1.0, 5, 1));

        limiter.allow("client");
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(!limiter.contains("client"));
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_spares_recent_clients() {
        let limiter = RateLimiter::new(policy(1.0, 5, 1));

        for _ in 0..5 {
            limiter.allow("chatty");
            tokio::time::sleep(Duration::from_millis(900)).await;
        }
        assert!(limiter.contains("chatty"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_janitor() {
        let limiter = RateLimiter::new(policy(1.0, 5, 1));
        limiter.allow("client");

        limiter.shutdown();
        limiter.shutdown();
        assert!(!limiter.is_janitor_running());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(limiter.contains("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_client_starts_fresh() {
        let limiter = RateLimiter::new(policy(1.0, 3, 1));
        limiter.shutdown();

        for _ in 0..3 {
            assert!(limiter.allow("x"));
        }
        assert!(!limiter.allow("x"));
        assert_eq!(limiter.tokens("x"), Some(0.0));

        tokio::time::advance(Duration::from_millis(2500)).await;
        assert_eq!(limiter.sweep(), 1);

        assert!(limiter.allow("x"));
        assert_eq!(limiter.tokens("x"), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_scenario() {
        let limiter = RateLimiter::new(policy(1.0, 3, 1));

        for _ in 0..3 {
            assert!(limiter.allow("X"));
        }
        assert!(!limiter.allow("X"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow("X"));

        // Idle for longer than 2 x cleanup interval; the janitor sweeps meanwhile.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(!limiter.contains("X"));

        for _ in 0..3 {
            assert!(limiter.allow("X"));
        }
        assert!(!limiter.allow("X"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_admit_exactly_burst() {
        let mut rng = rand::thread_rng();

        for _ in 0..8 {
            let burst: u32 = rng.gen_range(1..=32);
            let threads: usize = burst as usize + rng.gen_range(1..=32);

            // Refill is negligible for the duration of the test.
            let limiter = Arc::new(RateLimiter::new(policy(0.000_001, burst, 60)));
            let admitted = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(threads));

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let limiter = Arc::clone(&limiter);
                    let admitted = Arc::clone(&admitted);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        if limiter.allow("shared") {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(admitted.load(Ordering::SeqCst), burst as usize);
            assert_eq!(limiter.tracked_clients(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_clients() {
        let limiter = Arc::new(RateLimiter::new(policy(0.000_001, 2, 60)));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    let id = format!("client-{}", i % 4);
                    (0..4).filter(|_| limiter.allow(&id)).count()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 4 * 2);
        assert_eq!(limiter.tracked_clients(), 4);
    }

    #[tokio::test]
    async fn test_independent_instances() {
        let first = RateLimiter::new(policy(1.0, 1, 60));
        let second = RateLimiter::new(policy(1.0, 1, 60));

        assert!(first.allow("client"));
        assert!(!first.allow("client"));
        assert!(second.allow("client"));
    }
}
