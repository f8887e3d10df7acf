//! Property-based tests for the group transaction tracker
//!
//! Random record streams over a handful of groups and producers, checking
//! the properties compaction relies on:
//! - the watermark never moves backwards
//! - both views of every group stay consistent
//! - snapshot + suffix replay equals full replay
//! - redelivered records change nothing

use proptest::prelude::*;
use rivven_group_tx::{
    CheckpointTx, CommittedRecord, FenceV0, FenceV1, FenceV2, GroupCheckpoint,
    GroupCheckpointValue, GroupTxTracker, ProducerIdentity, RecordPayload, TrackerConfig, TxAbort,
    TxCommit, TxOffsetCommit, TxOffsets, VersionFence,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const GROUPS: [&str; 3] = ["orders", "payments", "audit"];

#[derive(Debug, Clone)]
enum Op {
    FenceV0 { group: usize, id: u64, epoch: u16 },
    FenceV1 { group: usize, id: u64, epoch: u16 },
    FenceV2 { group: usize, id: u64, epoch: u16 },
    Offsets { group: usize, id: u64, epoch: u16 },
    Abort { group: usize, id: u64, epoch: u16 },
    Commit { group: usize, id: u64, epoch: u16 },
    Version(u16),
    Checkpoint { group: usize, in_flight: Vec<(u64, u16, i64)> },
    Tombstone { group: usize },
    Ordinary,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let group = 0..GROUPS.len();
    let id = 0u64..4;
    let epoch = 0u16..3;
    prop_oneof![
        1 => (group.clone(), id.clone(), epoch.clone())
            .prop_map(|(group, id, epoch)| Op::FenceV0 { group, id, epoch }),
        1 => (group.clone(), id.clone(), epoch.clone())
            .prop_map(|(group, id, epoch)| Op::FenceV1 { group, id, epoch }),
        3 => (group.clone(), id.clone(), epoch.clone())
            .prop_map(|(group, id, epoch)| Op::FenceV2 { group, id, epoch }),
        2 => (group.clone(), id.clone(), epoch.clone())
            .prop_map(|(group, id, epoch)| Op::Offsets { group, id, epoch }),
        2 => (group.clone(), id.clone(), epoch.clone())
            .prop_map(|(group, id, epoch)| Op::Abort { group, id, epoch }),
        2 => (group.clone(), id.clone(), epoch.clone())
            .prop_map(|(group, id, epoch)| Op::Commit { group, id, epoch }),
        1 => (0u16..4).prop_map(Op::Version),
        1 => (
            group.clone(),
            prop::collection::vec((id.clone(), epoch.clone(), 0i64..200), 0..3)
        )
            .prop_map(|(group, in_flight)| Op::Checkpoint { group, in_flight }),
        1 => group.prop_map(|group| Op::Tombstone { group }),
        1 => Just(Op::Ordinary),
    ]
}

fn ts(offset: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(1_700_000_000_000 + offset as u64 * 250)
}

fn to_record(offset: i64, op: &Op) -> CommittedRecord {
    let payload = match op.clone() {
        Op::FenceV0 { group, id, epoch } => RecordPayload::FenceV0(FenceV0 {
            group_id: GROUPS[group].to_string(),
            producer: ProducerIdentity::new(id, epoch),
        }),
        Op::FenceV1 { group, id, epoch } => RecordPayload::FenceV1(FenceV1 {
            group_id: GROUPS[group].to_string(),
            producer: ProducerIdentity::new(id, epoch),
            transactional_id: format!("tx-{}", id),
            timeout: Duration::from_secs(20),
        }),
        Op::FenceV2 { group, id, epoch } => RecordPayload::FenceV2(FenceV2 {
            group_id: GROUPS[group].to_string(),
            producer: ProducerIdentity::new(id, epoch),
            transactional_id: format!("tx-{}", id),
            timeout: Duration::from_secs(20),
            tm_partition: 0,
        }),
        Op::Offsets { group, id, epoch } => RecordPayload::Offsets(TxOffsets {
            group_id: GROUPS[group].to_string(),
            producer: ProducerIdentity::new(id, epoch),
            offsets: vec![TxOffsetCommit {
                topic: "events".to_string(),
                partition: 0,
                offset,
                metadata: None,
            }],
        }),
        Op::Abort { group, id, epoch } => RecordPayload::Abort(TxAbort {
            group_id: GROUPS[group].to_string(),
            producer: ProducerIdentity::new(id, epoch),
        }),
        Op::Commit { group, id, epoch } => RecordPayload::Commit(TxCommit {
            group_id: GROUPS[group].to_string(),
            producer: ProducerIdentity::new(id, epoch),
        }),
        Op::Version(version) => RecordPayload::VersionFence(VersionFence { version }),
        Op::Checkpoint { group, in_flight } => RecordPayload::GroupCheckpoint(GroupCheckpoint {
            group_id: GROUPS[group].to_string(),
            value: Some(GroupCheckpointValue {
                generation: 1,
                protocol_type: Some("consumer".to_string()),
                in_flight: in_flight
                    .into_iter()
                    .map(|(id, epoch, begin_offset)| CheckpointTx {
                        producer: ProducerIdentity::new(id, epoch),
                        begin_offset,
                    })
                    .collect(),
            }),
        }),
        Op::Tombstone { group } => RecordPayload::GroupCheckpoint(GroupCheckpoint {
            group_id: GROUPS[group].to_string(),
            value: None,
        }),
        Op::Ordinary => RecordPayload::Ordinary,
    };
    CommittedRecord::new(offset, ts(offset), payload)
}

fn records_strategy() -> impl Strategy<Value = Vec<CommittedRecord>> {
    prop::collection::vec(op_strategy(), 1..120).prop_map(|ops| {
        ops.iter()
            .enumerate()
            .map(|(i, op)| to_record(i as i64, op))
            .collect()
    })
}

fn tracker() -> GroupTxTracker {
    GroupTxTracker::new(&TrackerConfig::default())
}

fn replay(records: &[CommittedRecord]) -> GroupTxTracker {
    let mut tracker = tracker();
    for record in records {
        tracker.apply(record).unwrap();
    }
    tracker
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The retained prefix only ever shrinks
    #[test]
    fn test_watermark_is_monotonic(records in records_strategy()) {
        let mut tracker = tracker();
        let mut previous = tracker.max_collectible_offset();

        for record in &records {
            tracker.apply(record).unwrap();
            let watermark = tracker.max_collectible_offset();
            prop_assert!(watermark >= previous, "watermark moved back from {} to {} at {:?}", previous, watermark, record);
            prop_assert!(watermark <= tracker.last_applied());
            previous = watermark;
        }
    }

    /// begin_offsets and producer_states describe the same transactions
    #[test]
    fn test_ledger_views_stay_consistent(records in records_strategy()) {
        let mut tracker = tracker();
        for record in &records {
            tracker.apply(record).unwrap();
            prop_assert!(tracker.ledger().check_invariants().is_ok());
            for (_, group) in tracker.ledger().groups() {
                prop_assert!(!group.is_empty());
            }
        }
    }

    /// Restoring a snapshot taken at any point and replaying the suffix
    /// reaches the state of a full replay
    #[test]
    fn test_snapshot_then_suffix_equals_full_replay(
        records in records_strategy(),
        cut in any::<prop::sample::Index>(),
        overlap in 0usize..4,
    ) {
        let full = replay(&records);

        let cut = cut.index(records.len()) + 1;
        let prefix = replay(&records[..cut]);
        let data = prefix.take_snapshot().unwrap();

        let mut restored = tracker();
        restored.apply_snapshot(&data, SystemTime::now()).unwrap();
        // the log may hand over a few records the snapshot already covers
        for record in &records[cut.saturating_sub(overlap)..] {
            restored.apply(record).unwrap();
        }

        prop_assert_eq!(restored.ledger(), full.ledger());
        prop_assert_eq!(restored.last_applied(), full.last_applied());
        prop_assert_eq!(restored.active_version(), full.active_version());
        prop_assert_eq!(restored.max_collectible_offset(), full.max_collectible_offset());
    }

    /// Delivering the whole log twice has no effect the second time
    #[test]
    fn test_redelivery_is_idempotent(records in records_strategy()) {
        let once = replay(&records);

        let mut twice = replay(&records);
        for record in &records {
            twice.apply(record).unwrap();
        }

        prop_assert_eq!(twice.ledger(), once.ledger());
        prop_assert_eq!(twice.last_applied(), once.last_applied());
    }

    /// Only legacy fence transactions ever expire
    #[test]
    fn test_expiry_never_touches_current_fences(records in records_strategy()) {
        let mut tracker = replay(&records);
        let far_future = ts(1_000_000);

        let current_before: Vec<_> = tracker
            .inflight_transactions()
            .into_iter()
            .filter(|tx| !tx.fence_kind.is_legacy())
            .collect();

        for (group, producer) in tracker.expired_legacy_transactions(far_future, Duration::ZERO) {
            prop_assert!(tracker.expire(&group, &producer, far_future, Duration::ZERO).unwrap());
        }

        let after = tracker.inflight_transactions();
        prop_assert!(after.iter().all(|tx| !tx.fence_kind.is_legacy()));
        prop_assert_eq!(after, current_before);
        prop_assert!(tracker.ledger().check_invariants().is_ok());
    }

    /// Arbitrary bytes never crash snapshot restore
    #[test]
    fn test_snapshot_from_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut tracker = tracker();
        let _ = tracker.apply_snapshot(&data, SystemTime::now());
    }
}
