//! Periodic background polling.
//!
//! The scheduler runs one cycle at a time. A tick that arrives while a cycle
//! is still running is skipped rather than queued.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::relay::pipeline::FeedRelay;

/// Background poller of one feed.
pub struct Scheduler {
    relay: Arc<FeedRelay>,
    poll_interval: Duration,
}

impl Scheduler {
    /// Create a scheduler polling `relay` every `poll_interval`.
    pub fn new(relay: Arc<FeedRelay>, poll_interval: Duration) -> Self {
        Self {
            relay,
            poll_interval,
        }
    }

    /// Create a scheduler with an interval in seconds.
    pub fn with_interval_secs(relay: Arc<FeedRelay>, interval_secs: u64) -> Self {
        Self::new(relay, Duration::from_secs(interval_secs))
    }

    /// Start polling in a background task.
    ///
    /// The first cycle runs once `ready` completes, then every interval.
    pub fn start<F>(self, ready: F) -> SchedulerHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(ready, token).await });
        SchedulerHandle { cancel, join }
    }

    async fn run<F>(self, ready: F, cancel: CancellationToken)
    where
        F: std::future::Future<Output = ()> + Send,
    {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ready => {}
        }

        info!(
            "Feed scheduler started for {} (interval: {} seconds)",
            self.relay.feed_id(),
            self.poll_interval.as_secs()
        );

        let mut timer = interval(self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            self.run_once(&cancel).await;
        }

        info!("Feed scheduler stopped for {}", self.relay.feed_id());
    }

    /// Run one cycle, containing any error or panic.
    async fn run_once(&self, cancel: &CancellationToken) {
        let cycle = AssertUnwindSafe(self.relay.run_cycle(cancel)).catch_unwind();
        match cycle.await {
            Ok(Ok(report)) => debug!("Cycle finished: {:?}", report),
            Ok(Err(e)) => error!("Feed cycle failed: {}", e),
            Err(panic) => error!("Feed cycle panicked: {}", panic_message(panic.as_ref())),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Handle to a running [`Scheduler`].
pub struct SchedulerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop polling and wait for the task to end.
    ///
    /// An in-flight cycle finishes the item it is dispatching first.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!("Feed scheduler task failed: {}", e);
        }
    }

    /// Check whether the background task has ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
