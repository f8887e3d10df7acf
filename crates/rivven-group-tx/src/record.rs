//! Committed records of a consumer-group partition
//!
//! The consensus layer decodes every committed batch of a `__consumer_offsets`
//! style partition into one [`CommittedRecord`] and hands them to the tracker
//! in log order. Only the transactional control records change tracker state;
//! everything else just advances the applied offset.
//!
//! ## Fence formats
//!
//! ```text
//! version  batch kind   payload
//! ───────  ──────────   ────────────────────────────────────────────
//!   v0     TxFence      group, producer
//!   v1     TxFence      group, producer, transactional id, timeout
//!   v2     GroupFence   group, producer, transactional id, timeout, tm partition
//! ```
//!
//! `TxFence` is the legacy batch kind. Entries created by it are the only
//! ones the expiry sweeper may reclaim.

use crate::types::{GroupId, Offset, ProducerIdentity};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Highest record format version this build understands
pub const SUPPORTED_FORMAT_VERSION: u16 = 2;

/// Batch kind that opened a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FenceRecordKind {
    /// Legacy fence batch (v0 and v1 payloads)
    TxFence,

    /// Current group fence batch (v2 payloads)
    GroupFence,
}

impl FenceRecordKind {
    /// Legacy fences have no reliable liveness signal and may be expired
    pub fn is_legacy(&self) -> bool {
        matches!(self, FenceRecordKind::TxFence)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FenceRecordKind::TxFence => "tx_fence",
            FenceRecordKind::GroupFence => "group_fence",
        }
    }
}

impl std::fmt::Display for FenceRecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fence v0: opens a transaction, no timeout on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceV0 {
    pub group_id: GroupId,
    pub producer: ProducerIdentity,
}

/// Fence v1: adds the transactional id and the producer's timeout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceV1 {
    pub group_id: GroupId,
    pub producer: ProducerIdentity,
    pub transactional_id: String,
    #[serde(with = "crate::serde_utils::duration")]
    pub timeout: Duration,
}

/// Fence v2: written with the group fence batch kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceV2 {
    pub group_id: GroupId,
    pub producer: ProducerIdentity,
    pub transactional_id: String,
    #[serde(with = "crate::serde_utils::duration")]
    pub timeout: Duration,
    /// Transaction manager partition that coordinates this producer
    pub tm_partition: i32,
}

/// One offset staged inside a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOffsetCommit {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub metadata: Option<String>,
}

/// Offsets staged by a transactional producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOffsets {
    pub group_id: GroupId,
    pub producer: ProducerIdentity,
    pub offsets: Vec<TxOffsetCommit>,
}

/// Abort marker for a group transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAbort {
    pub group_id: GroupId,
    pub producer: ProducerIdentity,
}

/// Commit marker for a group transaction.
///
/// The committed offsets are rewritten as ordinary offset commits together
/// with this marker, so nothing about the transaction survives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxCommit {
    pub group_id: GroupId,
    pub producer: ProducerIdentity,
}

/// Minimum feature version in effect from this point of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionFence {
    pub version: u16,
}

/// An in-flight transaction recorded by a legacy group checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointTx {
    pub producer: ProducerIdentity,
    pub begin_offset: Offset,
}

/// Group metadata written before the fence based scheme existed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCheckpointValue {
    pub generation: i32,
    pub protocol_type: Option<String>,
    pub in_flight: Vec<CheckpointTx>,
}

/// Legacy group metadata record; `value == None` is a tombstone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCheckpoint {
    pub group_id: GroupId,
    pub value: Option<GroupCheckpointValue>,
}

/// Typed payload of a committed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordPayload {
    FenceV0(FenceV0),
    FenceV1(FenceV1),
    FenceV2(FenceV2),
    Offsets(TxOffsets),
    Abort(TxAbort),
    Commit(TxCommit),
    VersionFence(VersionFence),
    GroupCheckpoint(GroupCheckpoint),

    /// Plain offset commits and other data the tracker does not inspect
    Ordinary,

    /// A record kind this build could not decode
    Unrecognized { type_id: u8, reason: String },
}

impl RecordPayload {
    /// Format version the payload was written with
    pub fn format_version(&self) -> u16 {
        match self {
            RecordPayload::FenceV1(_) => 1,
            RecordPayload::FenceV2(_) => 2,
            _ => 0,
        }
    }

    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RecordPayload::FenceV0(_) => "fence_v0",
            RecordPayload::FenceV1(_) => "fence_v1",
            RecordPayload::FenceV2(_) => "fence_v2",
            RecordPayload::Offsets(_) => "tx_offsets",
            RecordPayload::Abort(_) => "tx_abort",
            RecordPayload::Commit(_) => "tx_commit",
            RecordPayload::VersionFence(_) => "version_fence",
            RecordPayload::GroupCheckpoint(_) => "group_checkpoint",
            RecordPayload::Ordinary => "ordinary",
            RecordPayload::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// A record delivered by the consensus layer in committed order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRecord {
    /// Log offset of the record
    pub offset: Offset,

    /// Batch timestamp as written in the log
    #[serde(with = "crate::serde_utils::system_time")]
    pub timestamp: SystemTime,

    pub payload: RecordPayload,
}

impl CommittedRecord {
    pub fn new(offset: Offset, timestamp: SystemTime, payload: RecordPayload) -> Self {
        Self {
            offset,
            timestamp,
            payload,
        }
    }
}
