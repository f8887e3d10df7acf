//! In-flight group transactions
//!
//! The ledger maps every consumer group to the transactions that are open in
//! it. It is pure data: the record applier and the expiry sweeper decide
//! *when* an entry appears or disappears, the ledger only keeps the two views
//! of a group (`begin_offsets` and `producer_states`) in agreement.
//!
//! ```text
//! Ledger
//!  └─ group "payments"
//!      ├─ begin_offsets          {100, 150}          ← min = group watermark
//!      ├─ producer_states        7:2 → {150, GroupFence, ts, 30s}
//!      │                         9:0 → {100, TxFence,    ts, 60s}
//!      └─ legacy_producer_begin  9:0 → 100           ← TxFence entries only
//! ```

use crate::error::{Result, TrackerError};
use crate::record::FenceRecordKind;
use crate::types::{GroupId, Offset, ProducerEpoch, ProducerId, ProducerIdentity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime};

/// State of one open transaction of one producer in one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerTxState {
    /// Batch kind of the fence that opened the transaction
    pub fence_kind: FenceRecordKind,

    /// First offset the transaction depends on
    pub begin_offset: Offset,

    /// Log timestamp of the opening fence
    #[serde(with = "crate::serde_utils::system_time")]
    pub begin_timestamp: SystemTime,

    /// Producer declared transaction timeout
    #[serde(with = "crate::serde_utils::duration")]
    pub timeout: Duration,
}

impl ProducerTxState {
    /// Legacy fence transaction whose timeout (plus `grace`) has passed at `now`.
    ///
    /// Current format transactions never expire here: only an explicit
    /// commit, abort or higher epoch fence may end them.
    pub fn expired_legacy_fence_tx(&self, now: SystemTime, grace: Duration) -> bool {
        if !self.fence_kind.is_legacy() {
            return false;
        }
        match self
            .begin_timestamp
            .checked_add(self.timeout)
            .and_then(|t| t.checked_add(grace))
        {
            Some(deadline) => now > deadline,
            None => false,
        }
    }
}

/// Outcome of opening a transaction in a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// No entry existed for the producer id
    Started,

    /// Lower epoch entries of the same producer id were fenced out
    Fenced { previous: Vec<ProducerIdentity> },

    /// An entry with an equal or higher epoch exists, nothing changed
    Stale { current: ProducerIdentity },
}

/// Open transactions of one consumer group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerGroupState {
    /// Begin offsets of all open transactions, ascending and unique
    pub begin_offsets: BTreeSet<Offset>,

    /// Deprecated producer → begin offset view, kept for legacy fence entries
    /// so that snapshot readers predating `producer_states` still see them
    #[serde(rename = "producer_to_begin_deprecated")]
    pub legacy_producer_begin: BTreeMap<ProducerIdentity, Offset>,

    /// Open transactions keyed by producer identity
    pub producer_states: BTreeMap<ProducerIdentity, ProducerTxState>,
}

impl PerGroupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group local watermark
    pub fn min_begin_offset(&self) -> Option<Offset> {
        self.begin_offsets.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.producer_states.is_empty() && self.begin_offsets.is_empty()
    }

    /// Tracked entries of a producer id, any epoch
    pub fn entries_for(
        &self,
        id: ProducerId,
    ) -> impl DoubleEndedIterator<Item = (&ProducerIdentity, &ProducerTxState)> {
        self.producer_states.range(
            ProducerIdentity::first_epoch(id)..=ProducerIdentity::last_epoch(id),
        )
    }

    /// Highest tracked epoch of a producer id
    pub fn current_identity(&self, id: ProducerId) -> Option<ProducerIdentity> {
        self.entries_for(id).next_back().map(|(pid, _)| *pid)
    }

    /// Open a transaction unless an equal or newer epoch already owns the producer id
    pub fn begin_tx(
        &mut self,
        group: &str,
        producer: ProducerIdentity,
        state: ProducerTxState,
    ) -> Result<BeginOutcome> {
        if let Some(current) = self.current_identity(producer.id) {
            if current.epoch >= producer.epoch {
                return Ok(BeginOutcome::Stale { current });
            }
        }

        let previous: Vec<ProducerIdentity> =
            self.entries_for(producer.id).map(|(pid, _)| *pid).collect();
        for pid in &previous {
            self.end_tx(group, pid)?;
        }

        self.begin_offsets.insert(state.begin_offset);
        if state.fence_kind.is_legacy() {
            self.legacy_producer_begin
                .insert(producer, state.begin_offset);
        }
        self.producer_states.insert(producer, state);

        if previous.is_empty() {
            Ok(BeginOutcome::Started)
        } else {
            Ok(BeginOutcome::Fenced { previous })
        }
    }

    /// Remove the entry of exactly `producer`, returning it if it was tracked.
    ///
    /// The begin offset stays in `begin_offsets` while another entry of the
    /// group still starts at the same offset.
    pub fn end_tx(
        &mut self,
        group: &str,
        producer: &ProducerIdentity,
    ) -> Result<Option<ProducerTxState>> {
        let Some(state) = self.producer_states.remove(producer) else {
            return Ok(None);
        };
        self.legacy_producer_begin.remove(producer);

        let shared = self
            .producer_states
            .values()
            .any(|other| other.begin_offset == state.begin_offset);
        if !shared && !self.begin_offsets.remove(&state.begin_offset) {
            return Err(TrackerError::InvariantViolation {
                group: group.to_string(),
                producer: *producer,
                reason: format!(
                    "begin offset {} of a tracked transaction is missing from begin_offsets",
                    state.begin_offset
                ),
            });
        }

        Ok(Some(state))
    }

    /// Entries of `id` whose epoch is strictly lower than `epoch`
    pub fn older_epochs(&self, id: ProducerId, epoch: ProducerEpoch) -> Vec<ProducerIdentity> {
        self.entries_for(id)
            .map(|(pid, _)| *pid)
            .filter(|pid| pid.epoch < epoch)
            .collect()
    }

    /// Verify that both views of the group describe the same transactions
    pub fn check_invariants(&self, group: &str) -> Result<()> {
        let expected: BTreeSet<Offset> = self
            .producer_states
            .values()
            .map(|s| s.begin_offset)
            .collect();

        if expected != self.begin_offsets {
            let producer = self
                .producer_states
                .keys()
                .next()
                .copied()
                .unwrap_or(ProducerIdentity::new(0, 0));
            return Err(TrackerError::InvariantViolation {
                group: group.to_string(),
                producer,
                reason: format!(
                    "begin_offsets {:?} do not match producer begin offsets {:?}",
                    self.begin_offsets, expected
                ),
            });
        }

        for (pid, offset) in &self.legacy_producer_begin {
            match self.producer_states.get(pid) {
                Some(state) if state.fence_kind.is_legacy() && state.begin_offset == *offset => {}
                _ => {
                    return Err(TrackerError::InvariantViolation {
                        group: group.to_string(),
                        producer: *pid,
                        reason: format!(
                            "deprecated begin offset {} has no matching legacy entry",
                            offset
                        ),
                    })
                }
            }
        }

        Ok(())
    }
}

/// All open transactions of the partition, by group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    groups: BTreeMap<GroupId, PerGroupState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_groups(groups: BTreeMap<GroupId, PerGroupState>) -> Self {
        Self { groups }
    }

    pub(crate) fn into_groups(self) -> BTreeMap<GroupId, PerGroupState> {
        self.groups
    }

    pub fn group(&self, group: &str) -> Option<&PerGroupState> {
        self.groups.get(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&GroupId, &PerGroupState)> {
        self.groups.iter()
    }

    pub(crate) fn group_mut(&mut self, group: &str) -> Option<&mut PerGroupState> {
        self.groups.get_mut(group)
    }

    pub(crate) fn group_entry(&mut self, group: &str) -> &mut PerGroupState {
        self.groups.entry(group.to_string()).or_default()
    }

    /// Forget a group whose transactions have all ended
    pub(crate) fn prune(&mut self, group: &str) {
        if self.groups.get(group).is_some_and(PerGroupState::is_empty) {
            self.groups.remove(group);
        }
    }

    /// Lowest begin offset across all groups
    pub fn min_begin_offset(&self) -> Option<Offset> {
        self.groups
            .values()
            .filter_map(PerGroupState::min_begin_offset)
            .min()
    }

    /// Number of open transactions
    pub fn open_transactions(&self) -> usize {
        self.groups.values().map(|g| g.producer_states.len()).sum()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, group: &str, producer: &ProducerIdentity) -> Option<&ProducerTxState> {
        self.groups.get(group)?.producer_states.get(producer)
    }

    pub fn check_invariants(&self) -> Result<()> {
        for (group, state) in &self.groups {
            state.check_invariants(group)?;
        }
        Ok(())
    }
}
