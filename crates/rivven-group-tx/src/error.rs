//! Tracker error types

use crate::types::{GroupId, Offset, ProducerIdentity};
use thiserror::Error;

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Tracker errors
#[derive(Debug, Error)]
pub enum TrackerError {
    // ==================== Apply Errors ====================
    #[error("invariant violation in group {group} for producer {producer}: {reason}")]
    InvariantViolation {
        group: GroupId,
        producer: ProducerIdentity,
        reason: String,
    },

    #[error("tracker stopped applying after a fatal error: {0}")]
    Poisoned(String),

    // ==================== Snapshot Errors ====================
    #[error("unsupported snapshot version {version} (compat {compat_version}, reader supports up to {supported})")]
    UnsupportedSnapshotVersion {
        version: u8,
        compat_version: u8,
        supported: u8,
    },

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("snapshot too large: {size} bytes (max {max})")]
    SnapshotTooLarge { size: usize, max: usize },

    #[error("nothing applied yet, cannot snapshot")]
    EmptySnapshot,

    #[error("snapshot requested at offset {requested} but only applied up to {applied}")]
    NotCaughtUp { requested: Offset, applied: Offset },

    #[error("serialization error: {0}")]
    Serialization(String),

    // ==================== Storage Errors ====================
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Configuration Errors ====================
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ==================== Lifecycle Errors ====================
    #[error("shutdown in progress")]
    ShuttingDown,
}

impl TrackerError {
    /// Check if this is a fatal error requiring the replica to stop applying
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TrackerError::InvariantViolation { .. }
                | TrackerError::Poisoned(_)
                | TrackerError::UnsupportedSnapshotVersion { .. }
        )
    }
}

impl From<postcard::Error> for TrackerError {
    fn from(e: postcard::Error) -> Self {
        TrackerError::Serialization(e.to_string())
    }
}
