//! Identifiers shared by the tracker, its records and its snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log offset within the consumer-group partition
pub type Offset = i64;

/// Special value indicating that no record has been applied yet
pub const NO_OFFSET: Offset = -1;

/// Producer ID type (unique identifier for each producer instance)
pub type ProducerId = u64;

/// Producer epoch (increments on restart, used for fencing)
pub type ProducerEpoch = u16;

/// Consumer group identifier
pub type GroupId = String;

/// A logical producer instance: `(producer_id, producer_epoch)`.
///
/// Ordered by id first and epoch second, so every epoch of one producer is a
/// contiguous range in an ordered map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProducerIdentity {
    pub id: ProducerId,
    pub epoch: ProducerEpoch,
}

impl ProducerIdentity {
    pub fn new(id: ProducerId, epoch: ProducerEpoch) -> Self {
        Self { id, epoch }
    }

    /// Smallest identity with this producer id
    pub(crate) fn first_epoch(id: ProducerId) -> Self {
        Self::new(id, ProducerEpoch::MIN)
    }

    /// Largest identity with this producer id
    pub(crate) fn last_epoch(id: ProducerId) -> Self {
        Self::new(id, ProducerEpoch::MAX)
    }
}

impl fmt::Display for ProducerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.epoch)
    }
}
