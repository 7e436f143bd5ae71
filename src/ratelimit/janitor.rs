//! Background sweep that evicts idle clients.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::limiter::ClientRegistry;

/// Handle to the periodic eviction task.
///
/// The task stops when [`Janitor::stop`] is called or the handle is dropped.
pub struct Janitor {
    shutdown_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Janitor {
    /// Spawn the sweep task onto the current Tokio runtime.
    ///
    /// The first sweep happens one full cleanup interval after spawning.
    pub(crate) fn spawn(registry: Arc<ClientRegistry>) -> Self {
        let shutdown_token = CancellationToken::new();
        let token = shutdown_token.clone();

        let handle = tokio::spawn(async move {
            run(registry, token).await;
        });

        Self {
            shutdown_token,
            handle,
        }
    }

    /// Cancel the sweep schedule.
    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }

    /// Whether the sweep task is still scheduled.
    pub fn is_running(&self) -> bool {
        !self.shutdown_token.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

async fn run(registry: Arc<ClientRegistry>, shutdown_token: CancellationToken) {
    let period = registry.policy().cleanup_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        interval_secs = period.as_secs_f64(),
        idle_timeout_secs = registry.policy().idle_timeout().as_secs_f64(),
        "Rate limit janitor started"
    );

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                info!("Rate limit janitor stopped");
                return;
            }
            _ = ticker.tick() => {
                let evicted = registry.evict_idle(Instant::now());
                if evicted > 0 {
                    debug!(
                        evicted = evicted,
                        remaining = registry.len(),
                        "Evicted idle rate limit clients"
                    );
                }
            }
        }
    }
}
