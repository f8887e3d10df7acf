//! Group transaction state machine service
//!
//! [`GroupTxStm`] owns a [`GroupTxTracker`] for one consumer-group partition
//! and wires it to the rest of the replica:
//!
//! - the consensus layer feeds committed records through [`GroupTxStm::apply`]
//! - the compactor reads [`GroupTxStm::max_collectible_offset`]
//! - local snapshots go to a [`SnapshotStore`]
//! - log-level snapshots are produced and installed as opaque bytes
//! - a background [`ExpirySweeper`] removes abandoned legacy transactions
//!
//! The tracker sits behind a `parking_lot::Mutex`. Every transition takes the
//! lock once and never holds it across an `.await`.

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::observability::TrackerMetrics;
use crate::record::CommittedRecord;
use crate::snapshot::{self, FileSnapshotStore, SnapshotStore};
use crate::sweeper::{self, system_clock, Clock, ExpirySweeper};
use crate::tracker::{
    GroupTxTracker, InflightTransaction, TrackerStatsSnapshot, TxRange,
};
use crate::types::Offset;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Replicated group transaction tracker with snapshotting and expiry
pub struct GroupTxStm {
    tracker: Arc<Mutex<GroupTxTracker>>,
    store: Arc<dyn SnapshotStore>,
    config: TrackerConfig,
    clock: Clock,
    shutdown_tx: broadcast::Sender<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for GroupTxStm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupTxStm")
            .field("config", &self.config)
            .field("last_applied", &self.last_applied())
            .field("stopped", &self.stopped.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl GroupTxStm {
    /// Create a state machine persisting local snapshots to `store`
    pub fn new(config: TrackerConfig, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            tracker: Arc::new(Mutex::new(GroupTxTracker::new(&config))),
            store,
            config,
            clock: system_clock(),
            shutdown_tx,
            sweeper: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Create a state machine with file snapshots under `config.snapshot_dir`
    pub fn with_file_store(config: TrackerConfig) -> Result<Self> {
        let store = FileSnapshotStore::new(config.snapshot_dir.clone(), config.snapshots_to_keep);
        Self::new(config, Arc::new(store))
    }

    /// Replace the wall clock used for expiry and snapshot migration
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TrackerError::ShuttingDown);
        }
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Restore the latest local snapshot and start the expiry sweeper.
    ///
    /// The consensus layer replays the log suffix after this returns.
    pub async fn start(&self) -> Result<()> {
        self.ensure_running()?;
        self.restore_local_snapshot().await?;

        {
            let mut sweeper = self.sweeper.lock();
            if sweeper.is_none() {
                *sweeper = Some(
                    ExpirySweeper::new(
                        self.tracker.clone(),
                        self.config.sweep_interval,
                        self.config.expiry_grace,
                        self.clock.clone(),
                        self.shutdown_tx.subscribe(),
                    )
                    .spawn(),
                );
            }
        }

        info!(
            last_applied = self.last_applied(),
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            "Group transaction tracker started"
        );
        Ok(())
    }

    /// Install the newest usable local snapshot.
    ///
    /// A corrupt snapshot is skipped in favour of the next older one; when
    /// none is usable the tracker rebuilds from the log. A snapshot written
    /// by an incompatible newer version is an error: replaying a log this
    /// build may not understand is not safe either.
    pub async fn restore_local_snapshot(&self) -> Result<bool> {
        let mut candidate = self.store.load_latest().await;
        loop {
            let (offset, data) = match candidate {
                Ok(Some(found)) => found,
                Ok(None) => {
                    debug!("No usable local snapshot to restore");
                    return Ok(false);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read local snapshot, rebuilding from the log");
                    return Ok(false);
                }
            };

            let applied = self.last_applied();
            if offset <= applied {
                debug!(offset, last_applied = applied, "Local snapshot is not newer than applied state");
                return Ok(false);
            }

            match snapshot::decode(
                &data,
                self.config.max_snapshot_size,
                (self.clock)(),
                self.config.legacy_fence_timeout,
            ) {
                Ok(state) => {
                    self.tracker.lock().install(state)?;
                    return Ok(true);
                }
                Err(e) if e.is_fatal() => {
                    error!(offset, error = %e, "Local snapshot cannot be read by this version");
                    return Err(e);
                }
                Err(e) => {
                    warn!(offset, error = %e, "Discarding unusable local snapshot, trying an older one");
                    candidate = self.store.load_before(offset).await;
                }
            }
        }
    }

    /// Stop the sweeper and refuse further records
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(());

        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Expiry sweeper task failed");
            }
        }
        info!(last_applied = self.last_applied(), "Group transaction tracker stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // ==================== Record Application ====================

    /// Apply one committed record
    pub fn apply(&self, record: &CommittedRecord) -> Result<()> {
        self.ensure_running()?;
        self.tracker.lock().apply(record)
    }

    /// Apply committed records in order, stopping at the first error.
    ///
    /// The lock is taken per record so readers interleave with long batches.
    pub fn apply_batch<'a, I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a CommittedRecord>,
    {
        for record in records {
            self.apply(record)?;
        }
        Ok(())
    }

    // ==================== Queries ====================

    /// Earliest offset the compactor must retain
    pub fn max_collectible_offset(&self) -> Offset {
        self.tracker.lock().max_collectible_offset()
    }

    /// Aborted transaction ranges within `[start, end]`
    pub fn aborted_tx_ranges(&self, start: Offset, end: Offset) -> Vec<TxRange> {
        self.tracker.lock().aborted_tx_ranges(start, end)
    }

    /// Point-in-time copy of the open transactions
    pub fn inflight_transactions(&self) -> Vec<InflightTransaction> {
        self.tracker.lock().inflight_transactions()
    }

    pub fn last_applied(&self) -> Offset {
        self.tracker.lock().last_applied()
    }

    pub fn active_version(&self) -> Option<u16> {
        self.tracker.lock().active_version()
    }

    pub fn stats(&self) -> TrackerStatsSnapshot {
        TrackerStatsSnapshot::from(self.tracker.lock().stats())
    }

    // ==================== Snapshots ====================

    /// Persist a local snapshot of the applied state; returns its offset
    pub async fn take_local_snapshot(&self) -> Result<Offset> {
        self.ensure_running()?;
        let (offset, data) = {
            let tracker = self.tracker.lock();
            (tracker.last_applied(), tracker.take_snapshot()?)
        };

        let size = data.len();
        self.store.persist(offset, data).await?;
        TrackerMetrics::increment_snapshots("local");
        TrackerMetrics::record_snapshot_size(size);
        Ok(offset)
    }

    /// Serialize state for a log-level snapshot at `offset`.
    ///
    /// The tracker must have applied at least up to `offset`. The returned
    /// bytes describe the state as of the last applied offset, which the
    /// consensus layer may install in place of the snapshot point.
    pub fn take_snapshot(&self, offset: Offset) -> Result<Bytes> {
        let tracker = self.tracker.lock();
        let applied = tracker.last_applied();
        if offset > applied {
            return Err(TrackerError::NotCaughtUp {
                requested: offset,
                applied,
            });
        }

        let data = tracker.take_snapshot()?;
        TrackerMetrics::increment_snapshots("raft");
        TrackerMetrics::record_snapshot_size(data.len());
        Ok(data)
    }

    /// Replace the tracker state with a log-level snapshot; returns its offset
    pub fn apply_raft_snapshot(&self, data: &[u8]) -> Result<Offset> {
        self.ensure_running()?;
        let state = snapshot::decode(
            data,
            self.config.max_snapshot_size,
            (self.clock)(),
            self.config.legacy_fence_timeout,
        )?;
        self.tracker.lock().install(state)
    }

    // ==================== Expiry ====================

    /// Run one expiry sweep now; returns the number of expired transactions
    pub async fn sweep_now(&self) -> Result<usize> {
        self.ensure_running()?;
        sweeper::sweep_expired(&self.tracker, (self.clock)(), self.config.expiry_grace).await
    }
}

impl Drop for GroupTxStm {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
