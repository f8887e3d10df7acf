//! # Rivven Group Transactions
//!
//! Replicated tracker of open consumer-group transactions for one offsets
//! partition. It rebuilds from the committed log which transactions are still
//! in flight and tells the compactor the earliest offset it must keep, so
//! that fence, offset and marker records of an unfinished transaction are
//! never compacted away.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   committed records   ┌──────────────────────────┐
//! │   consensus layer    │ ────────────────────► │        GroupTxStm        │
//! └──────────────────────┘                       │ ┌──────────────────────┐ │
//! ┌──────────────────────┐ max_collectible_offset│ │    GroupTxTracker    │ │
//! │      compactor       │ ◄──────────────────── │ │  Ledger  (per group) │ │
//! └──────────────────────┘                       │ └──────────────────────┘ │
//!                                                │  ExpirySweeper (legacy)  │
//!                                                │  SnapshotStore (local)   │
//!                                                └──────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use rivven_group_tx::{CommittedRecord, GroupTxStm, TrackerConfig};
//!
//! let stm = GroupTxStm::with_file_store(TrackerConfig::default())?;
//! stm.start().await?;
//!
//! for record in committed {
//!     stm.apply(&record)?;
//! }
//! let retain_from = stm.max_collectible_offset();
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod observability;
pub mod record;
pub mod serde_utils;
pub mod snapshot;
pub mod stm;
pub mod sweeper;
pub mod tracker;
pub mod types;

// Re-export main types
pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use ledger::{BeginOutcome, Ledger, PerGroupState, ProducerTxState};
pub use observability::{init_metrics, TrackerMetrics};
pub use record::{
    CheckpointTx, CommittedRecord, FenceRecordKind, FenceV0, FenceV1, FenceV2, GroupCheckpoint,
    GroupCheckpointValue, RecordPayload, TxAbort, TxCommit, TxOffsetCommit, TxOffsets,
    VersionFence, SUPPORTED_FORMAT_VERSION,
};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotState, SnapshotStore};
pub use stm::GroupTxStm;
pub use sweeper::{system_clock, Clock, ExpirySweeper};
pub use tracker::{
    GroupTxTracker, InflightTransaction, TrackerStats, TrackerStatsSnapshot, TxRange,
};
pub use types::{GroupId, Offset, ProducerEpoch, ProducerId, ProducerIdentity, NO_OFFSET};
