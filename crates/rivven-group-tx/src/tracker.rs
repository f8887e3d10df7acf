//! Group transaction tracker
//!
//! Rebuilds, in strict log order, the set of transactions that are still open
//! on a consumer-group partition and derives from it the offset below which
//! the log may be compacted.
//!
//! ## Record transitions
//!
//! ```text
//! fence (v0/v1/v2) ──> open entry, fencing out lower epochs of the producer
//!                          │
//! tx offsets ─────────────>│ (no change, retention stays anchored at the fence)
//!                          │
//! commit / abort ─────────>└──> entry removed
//!
//! legacy entries only: begin_timestamp + timeout elapsed ──> expired by the sweeper
//! ```
//!
//! Every transition is a pure function of the record and the prior state, so
//! replaying a record after a restart reaches the same state. Records at or
//! below the last applied offset are skipped, which makes restoring a snapshot
//! and replaying the suffix equivalent to replaying the whole log.
//!
//! An inconsistency between `begin_offsets` and `producer_states` poisons the
//! tracker: the error is returned and every later `apply` fails, because
//! continuing could retain too little of the log.

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::ledger::{BeginOutcome, Ledger, ProducerTxState};
use crate::observability::TrackerMetrics;
use crate::record::{
    CommittedRecord, FenceRecordKind, GroupCheckpoint, RecordPayload, TxOffsets, VersionFence,
    SUPPORTED_FORMAT_VERSION,
};
use crate::serde_utils::truncate_to_millis;
use crate::snapshot::{self, SnapshotState};
use crate::types::{GroupId, Offset, ProducerIdentity, NO_OFFSET};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Range of offsets belonging to an aborted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRange {
    pub producer: ProducerIdentity,
    pub first: Offset,
    pub last: Offset,
}

/// Read-only view of one open transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflightTransaction {
    pub group_id: GroupId,
    pub producer: ProducerIdentity,
    pub begin_offset: Offset,
    pub fence_kind: FenceRecordKind,
    #[serde(with = "crate::serde_utils::system_time")]
    pub begin_timestamp: SystemTime,
    #[serde(with = "crate::serde_utils::duration")]
    pub timeout: Duration,
}

/// Counters of tracker activity
#[derive(Debug, Default)]
pub struct TrackerStats {
    records_applied: AtomicU64,
    records_skipped: AtomicU64,
    stale_fences: AtomicU64,
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    transactions_fenced: AtomicU64,
    transactions_expired: AtomicU64,
}

impl TrackerStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_applied(&self) {
        self.records_applied.fetch_add(1, Ordering::Relaxed);
        TrackerMetrics::increment_records_applied();
    }

    fn record_skipped(&self, kind: &'static str) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
        TrackerMetrics::increment_records_skipped(kind);
    }

    fn record_stale_fence(&self) {
        self.stale_fences.fetch_add(1, Ordering::Relaxed);
        TrackerMetrics::increment_stale_fences();
    }

    fn record_begin(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
        TrackerMetrics::increment_transactions("begun");
    }

    fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        TrackerMetrics::increment_transactions("committed");
    }

    fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
        TrackerMetrics::increment_transactions("aborted");
    }

    fn record_fenced(&self, count: usize) {
        self.transactions_fenced
            .fetch_add(count as u64, Ordering::Relaxed);
        for _ in 0..count {
            TrackerMetrics::increment_transactions("fenced");
        }
    }

    fn record_expired(&self) {
        self.transactions_expired.fetch_add(1, Ordering::Relaxed);
        TrackerMetrics::increment_transactions("expired");
    }

    pub fn records_applied(&self) -> u64 {
        self.records_applied.load(Ordering::Relaxed)
    }

    pub fn records_skipped(&self) -> u64 {
        self.records_skipped.load(Ordering::Relaxed)
    }

    pub fn stale_fences(&self) -> u64 {
        self.stale_fences.load(Ordering::Relaxed)
    }

    pub fn transactions_begun(&self) -> u64 {
        self.transactions_begun.load(Ordering::Relaxed)
    }

    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    pub fn transactions_fenced(&self) -> u64 {
        self.transactions_fenced.load(Ordering::Relaxed)
    }

    pub fn transactions_expired(&self) -> u64 {
        self.transactions_expired.load(Ordering::Relaxed)
    }
}

/// Snapshot of tracker stats for serialization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStatsSnapshot {
    pub records_applied: u64,
    pub records_skipped: u64,
    pub stale_fences: u64,
    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub transactions_fenced: u64,
    pub transactions_expired: u64,
}

impl From<&TrackerStats> for TrackerStatsSnapshot {
    fn from(stats: &TrackerStats) -> Self {
        Self {
            records_applied: stats.records_applied(),
            records_skipped: stats.records_skipped(),
            stale_fences: stats.stale_fences(),
            transactions_begun: stats.transactions_begun(),
            transactions_committed: stats.transactions_committed(),
            transactions_aborted: stats.transactions_aborted(),
            transactions_fenced: stats.transactions_fenced(),
            transactions_expired: stats.transactions_expired(),
        }
    }
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxEnd {
    Commit,
    Abort,
}

/// Replicated state machine tracking open group transactions of one partition
#[derive(Debug)]
pub struct GroupTxTracker {
    ledger: Ledger,
    last_applied: Offset,
    /// Highest feature version announced by a version fence
    active_version: Option<u16>,
    legacy_fence_timeout: Duration,
    max_snapshot_size: usize,
    poisoned: Option<String>,
    stats: TrackerStats,
}

impl Default for GroupTxTracker {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

impl GroupTxTracker {
    /// Create an empty tracker
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            ledger: Ledger::new(),
            last_applied: NO_OFFSET,
            active_version: None,
            legacy_fence_timeout: config.legacy_fence_timeout,
            max_snapshot_size: config.max_snapshot_size,
            poisoned: None,
            stats: TrackerStats::new(),
        }
    }

    /// Open transactions (read-only)
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn last_applied(&self) -> Offset {
        self.last_applied
    }

    pub fn active_version(&self) -> Option<u16> {
        self.active_version
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    fn ensure_healthy(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(TrackerError::Poisoned(reason.clone())),
            None => Ok(()),
        }
    }

    // ==================== Record Applier ====================

    /// Apply one committed record.
    ///
    /// Must be called in log order. Records at or below the last applied
    /// offset are skipped.
    pub fn apply(&mut self, record: &CommittedRecord) -> Result<()> {
        self.ensure_healthy()?;

        if record.offset <= self.last_applied {
            debug!(
                offset = record.offset,
                last_applied = self.last_applied,
                kind = record.payload.kind(),
                "Skipping already applied record"
            );
            return Ok(());
        }

        match self.apply_payload(record) {
            Ok(()) => {
                self.last_applied = record.offset;
                self.stats.record_applied();
                TrackerMetrics::set_open_transactions(self.ledger.open_transactions());
                TrackerMetrics::set_max_collectible_offset(self.max_collectible_offset());
                Ok(())
            }
            Err(e) => {
                if e.is_fatal() {
                    error!(
                        offset = record.offset,
                        kind = record.payload.kind(),
                        error = %e,
                        "Group transaction tracker stopped applying"
                    );
                    self.poisoned = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Dispatch one record by kind.
    ///
    /// The active version fence never rejects a record: anything in the
    /// committed log is applied, and a format newer than the fence is only
    /// logged.
    fn apply_payload(&mut self, record: &CommittedRecord) -> Result<()> {
        if let Some(active) = self.active_version {
            if record.payload.format_version() > active {
                debug!(
                    offset = record.offset,
                    kind = record.payload.kind(),
                    active_version = active,
                    "Record format is newer than the active version fence"
                );
            }
        }

        match &record.payload {
            RecordPayload::FenceV0(fence) => self.begin(
                record,
                FenceRecordKind::TxFence,
                &fence.group_id,
                fence.producer,
                self.legacy_fence_timeout,
            ),
            RecordPayload::FenceV1(fence) => self.begin(
                record,
                FenceRecordKind::TxFence,
                &fence.group_id,
                fence.producer,
                fence.timeout,
            ),
            RecordPayload::FenceV2(fence) => self.begin(
                record,
                FenceRecordKind::GroupFence,
                &fence.group_id,
                fence.producer,
                fence.timeout,
            ),
            RecordPayload::Offsets(offsets) => self.handle_tx_offsets(record.offset, offsets),
            RecordPayload::Abort(abort) => {
                self.end(record.offset, &abort.group_id, abort.producer, TxEnd::Abort)
            }
            RecordPayload::Commit(commit) => {
                self.end(record.offset, &commit.group_id, commit.producer, TxEnd::Commit)
            }
            RecordPayload::VersionFence(fence) => {
                self.handle_version_fence(record.offset, *fence);
                Ok(())
            }
            RecordPayload::GroupCheckpoint(checkpoint) => {
                self.handle_group_checkpoint(record, checkpoint)
            }
            RecordPayload::Ordinary => Ok(()),
            RecordPayload::Unrecognized { type_id, reason } => {
                warn!(
                    offset = record.offset,
                    type_id = *type_id,
                    reason = %reason,
                    "Skipping unrecognized record"
                );
                self.stats.record_skipped("unrecognized");
                Ok(())
            }
        }
    }

    fn begin(
        &mut self,
        record: &CommittedRecord,
        fence_kind: FenceRecordKind,
        group: &str,
        producer: ProducerIdentity,
        timeout: Duration,
    ) -> Result<()> {
        let state = ProducerTxState {
            fence_kind,
            begin_offset: record.offset,
            begin_timestamp: truncate_to_millis(record.timestamp),
            timeout: Duration::from_millis(timeout.as_millis() as u64),
        };

        match self.ledger.group_entry(group).begin_tx(group, producer, state)? {
            BeginOutcome::Started => {
                debug!(group = %group, producer = %producer, offset = record.offset, kind = %fence_kind, "Transaction begin");
                self.stats.record_begin();
            }
            BeginOutcome::Fenced { previous } => {
                debug!(
                    group = %group,
                    producer = %producer,
                    offset = record.offset,
                    fenced = ?previous,
                    "Transaction begin fenced out older epochs"
                );
                self.stats.record_fenced(previous.len());
                self.stats.record_begin();
            }
            BeginOutcome::Stale { current } => {
                debug!(
                    group = %group,
                    producer = %producer,
                    current = %current,
                    offset = record.offset,
                    "Ignoring fence with stale epoch"
                );
                self.stats.record_stale_fence();
            }
        }
        Ok(())
    }

    /// Remove lower epoch entries of `producer`'s id; returns how many were removed
    fn fence_older_epochs(&mut self, group: &str, producer: ProducerIdentity) -> Result<usize> {
        let Some(state) = self.ledger.group_mut(group) else {
            return Ok(0);
        };
        let older = state.older_epochs(producer.id, producer.epoch);
        for pid in &older {
            state.end_tx(group, pid)?;
        }
        Ok(older.len())
    }

    fn handle_tx_offsets(&mut self, offset: Offset, offsets: &TxOffsets) -> Result<()> {
        let group = offsets.group_id.as_str();
        let tracked = self
            .ledger
            .get(group, &offsets.producer)
            .map(|s| s.begin_offset);

        if let Some(begin_offset) = tracked {
            debug!(
                group = %group,
                producer = %offsets.producer,
                offset,
                begin_offset,
                partitions = offsets.offsets.len(),
                "Offsets staged in open transaction"
            );
            return Ok(());
        }

        let fenced = self.fence_older_epochs(group, offsets.producer)?;
        if fenced > 0 {
            debug!(group = %group, producer = %offsets.producer, offset, fenced, "Offsets from newer epoch fenced out open transaction");
            self.stats.record_fenced(fenced);
            self.ledger.prune(group);
        } else {
            debug!(group = %group, producer = %offsets.producer, offset, "Offsets for untracked transaction");
        }
        Ok(())
    }

    fn end(
        &mut self,
        offset: Offset,
        group: &str,
        producer: ProducerIdentity,
        how: TxEnd,
    ) -> Result<()> {
        let Some(state) = self.ledger.group_mut(group) else {
            debug!(group = %group, producer = %producer, offset, ?how, "No open transaction to end");
            return Ok(());
        };

        let exact = state.end_tx(group, &producer)?;
        // A marker under a bumped epoch also concludes the older epoch's transaction.
        let fenced = self.fence_older_epochs(group, producer)?;
        self.ledger.prune(group);

        if exact.is_none() && fenced == 0 {
            debug!(group = %group, producer = %producer, offset, ?how, "No open transaction to end");
            return Ok(());
        }

        debug!(
            group = %group,
            producer = %producer,
            offset,
            ?how,
            begin_offset = exact.as_ref().map(|s| s.begin_offset),
            older_epochs = fenced,
            "Transaction end"
        );
        match how {
            TxEnd::Commit => self.stats.record_commit(),
            TxEnd::Abort => self.stats.record_abort(),
        }
        if exact.is_some() && fenced > 0 {
            self.stats.record_fenced(fenced);
        }
        Ok(())
    }

    fn handle_version_fence(&mut self, offset: Offset, fence: VersionFence) {
        if fence.version > SUPPORTED_FORMAT_VERSION {
            warn!(
                offset,
                version = fence.version,
                supported = SUPPORTED_FORMAT_VERSION,
                "Version fence announces formats this build cannot decode"
            );
        }

        match self.active_version {
            Some(current) if fence.version < current => {
                info!(
                    offset,
                    version = fence.version,
                    current,
                    "Ignoring version fence that lowers the active version"
                );
            }
            _ => {
                debug!(offset, version = fence.version, "Version fence");
                self.active_version = Some(fence.version);
            }
        }
    }

    fn handle_group_checkpoint(
        &mut self,
        record: &CommittedRecord,
        checkpoint: &GroupCheckpoint,
    ) -> Result<()> {
        let group = checkpoint.group_id.as_str();

        let Some(value) = &checkpoint.value else {
            match self.ledger.group(group) {
                Some(state) if !state.producer_states.is_empty() => {
                    warn!(
                        group = %group,
                        offset = record.offset,
                        open = state.producer_states.len(),
                        "Ignoring group tombstone while transactions are open"
                    );
                }
                _ => {
                    debug!(group = %group, offset = record.offset, "Group tombstone");
                    self.ledger.prune(group);
                }
            }
            return Ok(());
        };

        // The retention floor never moves below the current watermark.
        let floor = self.max_collectible_offset();
        for tx in &value.in_flight {
            let state = self.ledger.group_entry(group);
            if state.current_identity(tx.producer.id).is_some() {
                continue;
            }

            let begin_offset = tx.begin_offset.max(floor).min(record.offset);
            let seeded = ProducerTxState {
                fence_kind: FenceRecordKind::TxFence,
                begin_offset,
                begin_timestamp: truncate_to_millis(record.timestamp),
                timeout: Duration::from_millis(self.legacy_fence_timeout.as_millis() as u64),
            };
            state.begin_tx(group, tx.producer, seeded)?;
            debug!(
                group = %group,
                producer = %tx.producer,
                begin_offset,
                generation = value.generation,
                "Seeded transaction from legacy group checkpoint"
            );
            self.stats.record_begin();
        }
        self.ledger.prune(group);
        Ok(())
    }

    // ==================== Watermark ====================

    /// Earliest offset compaction must retain.
    ///
    /// The lowest begin offset of any open transaction, or the last applied
    /// offset when nothing is open.
    pub fn max_collectible_offset(&self) -> Offset {
        self.ledger.min_begin_offset().unwrap_or(self.last_applied)
    }

    /// Aborted ranges the compactor may drop. Always empty here: committed
    /// group transactions are rewritten as plain offset commits together with
    /// the commit marker, so transactional batches never need to be told apart
    /// from ordinary data once their transaction is gone.
    pub fn aborted_tx_ranges(&self, _start: Offset, _end: Offset) -> Vec<TxRange> {
        Vec::new()
    }

    // ==================== Expiry ====================

    /// Legacy fence transactions past their timeout at `now`
    pub fn expired_legacy_transactions(
        &self,
        now: SystemTime,
        grace: Duration,
    ) -> Vec<(GroupId, ProducerIdentity)> {
        self.ledger
            .groups()
            .flat_map(|(group, state)| {
                state
                    .producer_states
                    .iter()
                    .filter(|(_, tx)| tx.expired_legacy_fence_tx(now, grace))
                    .map(move |(pid, _)| (group.clone(), *pid))
            })
            .collect()
    }

    /// Expire one legacy transaction if it is still tracked and still expired.
    ///
    /// Returns whether an entry was removed.
    pub fn expire(
        &mut self,
        group: &str,
        producer: &ProducerIdentity,
        now: SystemTime,
        grace: Duration,
    ) -> Result<bool> {
        self.ensure_healthy()?;

        let expired = self
            .ledger
            .get(group, producer)
            .is_some_and(|tx| tx.expired_legacy_fence_tx(now, grace));
        if !expired {
            return Ok(false);
        }

        let removed = match self.ledger.group_mut(group) {
            Some(state) => state.end_tx(group, producer),
            None => Ok(None),
        };
        let removed = match removed {
            Ok(removed) => removed,
            Err(e) => {
                error!(group = %group, producer = %producer, error = %e, "Expiry found inconsistent state");
                self.poisoned = Some(e.to_string());
                return Err(e);
            }
        };
        self.ledger.prune(group);

        if let Some(tx) = removed {
            info!(
                group = %group,
                producer = %producer,
                begin_offset = tx.begin_offset,
                timeout_ms = tx.timeout.as_millis() as u64,
                "Expired abandoned legacy fence transaction"
            );
            self.stats.record_expired();
            TrackerMetrics::set_open_transactions(self.ledger.open_transactions());
            TrackerMetrics::set_max_collectible_offset(self.max_collectible_offset());
            return Ok(true);
        }
        Ok(false)
    }

    // ==================== Inspection ====================

    /// Point-in-time copy of every open transaction, by group then producer
    pub fn inflight_transactions(&self) -> Vec<InflightTransaction> {
        self.ledger
            .groups()
            .flat_map(|(group, state)| {
                state
                    .producer_states
                    .iter()
                    .map(move |(pid, tx)| InflightTransaction {
                        group_id: group.clone(),
                        producer: *pid,
                        begin_offset: tx.begin_offset,
                        fence_kind: tx.fence_kind,
                        begin_timestamp: tx.begin_timestamp,
                        timeout: tx.timeout,
                    })
            })
            .collect()
    }

    // ==================== Snapshots ====================

    /// Serialize the tracker as of the last applied offset
    pub fn take_snapshot(&self) -> Result<Bytes> {
        self.ensure_healthy()?;
        if self.last_applied == NO_OFFSET {
            return Err(TrackerError::EmptySnapshot);
        }
        snapshot::encode(
            self.last_applied,
            self.active_version,
            &self.ledger,
            self.max_snapshot_size,
        )
    }

    /// Replace the tracker state with a decoded snapshot.
    ///
    /// Legacy entries migrated from old snapshots start their timeout at `now`.
    pub fn apply_snapshot(&mut self, data: &[u8], now: SystemTime) -> Result<Offset> {
        self.ensure_healthy()?;
        let restored = snapshot::decode(
            data,
            self.max_snapshot_size,
            now,
            self.legacy_fence_timeout,
        )?;
        self.install(restored)
    }

    /// Replace the tracker state with an already decoded snapshot
    pub(crate) fn install(&mut self, state: SnapshotState) -> Result<Offset> {
        self.ensure_healthy()?;
        self.ledger = state.ledger;
        self.last_applied = state.offset;
        self.active_version = state.active_version;
        TrackerMetrics::set_open_transactions(self.ledger.open_transactions());
        TrackerMetrics::set_max_collectible_offset(self.max_collectible_offset());
        info!(
            offset = state.offset,
            groups = self.ledger.group_count(),
            open_transactions = self.ledger.open_transactions(),
            "Installed group transaction snapshot"
        );
        Ok(state.offset)
    }
}
