//! Expiry sweeper for abandoned legacy fence transactions
//!
//! Transactions opened by a legacy fence have no reliable signal that their
//! coordinator gave up on them. Once `begin_timestamp + timeout` has passed,
//! the sweeper removes them so they cannot pin the watermark forever.
//!
//! A sweep collects candidates under the tracker lock, then removes them one
//! lock acquisition at a time, yielding in between so a large backlog never
//! starves record application.

use crate::error::Result;
use crate::observability::TrackerMetrics;
use crate::tracker::GroupTxTracker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Wall clock used to judge transaction timeouts
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// The system wall clock
pub fn system_clock() -> Clock {
    Arc::new(SystemTime::now)
}

/// Expire every legacy transaction past its deadline at `now`.
///
/// Each candidate is re-checked under the lock, so records applied between
/// collection and removal win. Returns the number of removed entries.
pub async fn sweep_expired(
    tracker: &Mutex<GroupTxTracker>,
    now: SystemTime,
    grace: Duration,
) -> Result<usize> {
    let started = Instant::now();
    let candidates = tracker.lock().expired_legacy_transactions(now, grace);

    let mut expired = 0;
    for (group, producer) in &candidates {
        let removed = tracker.lock().expire(group, producer, now, grace)?;
        if removed {
            expired += 1;
        }
        tokio::task::yield_now().await;
    }

    TrackerMetrics::record_sweep_duration(started.elapsed());
    debug!(
        candidates = candidates.len(),
        expired,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Expiry sweep finished"
    );
    Ok(expired)
}

/// Background task running [`sweep_expired`] on a fixed interval
pub struct ExpirySweeper {
    tracker: Arc<Mutex<GroupTxTracker>>,
    interval: Duration,
    grace: Duration,
    clock: Clock,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ExpirySweeper {
    pub fn new(
        tracker: Arc<Mutex<GroupTxTracker>>,
        interval: Duration,
        grace: Duration,
        clock: Clock,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            tracker,
            interval,
            grace,
            clock,
            shutdown_rx,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep every `interval` until shutdown. The first sweep runs one full
    /// interval after start.
    pub async fn run(mut self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis() as u64, "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = (self.clock)();
                    match sweep_expired(&self.tracker, now, self.grace).await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "Expired abandoned legacy transactions"),
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "Expiry sweeper stopping");
                            break;
                        }
                        Err(e) => warn!(error = %e, "Expiry sweep failed"),
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    debug!("Expiry sweeper received shutdown");
                    break;
                }
            }
        }
    }
}
