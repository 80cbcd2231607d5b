//! TickLoop - run a task on a fixed period until shut down
//!
//! One loop per handle. Replacing a schedule means shutting the old handle
//! down and spawning a new one, so two schedules for the same task never
//! overlap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::DrainLoop;
use crate::error::Result;

/// Work run on every tick.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    async fn tick(&self) -> Result<()>;
}

#[async_trait]
impl<T: Send + 'static> PeriodicTask for DrainLoop<T> {
    fn name(&self) -> &str {
        "drain"
    }

    async fn tick(&self) -> Result<()> {
        self.drain_once().await.map(|_| ())
    }
}

/// Handle to a spawned periodic loop.
/// - dropping the handle without `shutdown_and_join` leaves the loop running
///   until its shutdown sender is dropped with it
/// - an in-flight tick is never cancelled; shutdown waits for it
pub struct TickLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    period: Duration,
}

impl TickLoop {
    /// Spawn `task` to run every `period`, first tick immediately.
    pub fn spawn(task: Arc<dyn PeriodicTask>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(tick_loop(task, period, shutdown_rx));
        Self {
            shutdown_tx,
            join,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stop scheduling new ticks.
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for the loop (and any in-flight tick) to finish.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            warn!(error = %e, "tick loop ended abnormally");
        }
    }

    /// Stop this loop and start `task` on `period` in its place.
    pub async fn replace(self, task: Arc<dyn PeriodicTask>, period: Duration) -> Self {
        self.shutdown_and_join().await;
        Self::spawn(task, period)
    }
}

async fn tick_loop(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(task = task.name(), period_secs = period.as_secs_f64(), "tick loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        debug!(task = task.name(), "tick");
        if let Err(e) = task.tick().await {
            warn!(task = task.name(), error = %e, "tick failed");
        }
    }

    info!(task = task.name(), "tick loop stopped");
}
