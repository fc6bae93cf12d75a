//! Periodic tracker cleanup.
//!
//! A background tokio task ticks at a fixed interval and asks the
//! tracker to evict when occupancy is above its auto-cleanup threshold.
//! It runs independently of the task scheduler; the tracker's own lock
//! keeps the two consistent.

use std::sync::Arc;
use std::time::Duration;

use kerf_pipeline::ResourceTracker;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Default tick interval.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to a running cleanup loop. Stops the loop when dropped.
#[derive(Debug)]
pub struct AutoCleanup {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<u64>,
}

impl AutoCleanup {
    /// Start ticking every `interval` on `runtime`.
    ///
    /// The first tick happens one full interval after start.
    #[must_use]
    pub fn spawn(runtime: &Handle, tracker: Arc<ResourceTracker>, interval: Duration) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(cleanup_loop(tracker, interval, shutdown_rx));
        Self {
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Stop the loop and wait for it. Returns the number of handles it
    /// evicted over its lifetime.
    pub async fn stop(mut self) -> u64 {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        (&mut self.task).await.unwrap_or(0)
    }
}

impl Drop for AutoCleanup {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
async fn cleanup_loop(
    tracker: Arc<ResourceTracker>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> u64 {
    let period = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut evicted = 0_u64;
    tracing::info!(interval_ms = period.as_millis() as u64, "auto cleanup started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let released = tracker.cleanup_tick();
                evicted += released as u64;
            }
            _ = &mut shutdown => break,
        }
    }

    tracing::info!(evicted, "auto cleanup stopped");
    evicted
}
