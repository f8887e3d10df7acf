//! Tracker snapshots
//!
//! A snapshot is a versioned envelope around the serialized ledger:
//!
//! ```text
//! ┌─────────┬────────────────┬────────┬──────────┬──────────────────────────┐
//! │ version │ compat_version │ offset │ checksum │ payload                  │
//! │   u8    │       u8       │  i64   │ crc32    │ active_version, groups   │
//! └─────────┴────────────────┴────────┴──────────┴──────────────────────────┘
//! ```
//!
//! `compat_version` is the oldest reader version able to decode the payload.
//! Payloads are decoded as a prefix, so a newer writer may append fields that
//! older readers skip.
//!
//! Version 0 payloads only carry `begin_offsets` and the deprecated
//! producer → begin offset map. Their entries are migrated to legacy fence
//! transactions whose timeout starts when the snapshot is loaded.
//!
//! Local snapshots are a restart optimization. The log-level snapshot the
//! consensus layer installs is authoritative and replaces local state.

use crate::error::{Result, TrackerError};
use crate::ledger::{BeginOutcome, Ledger, PerGroupState, ProducerTxState};
use crate::record::FenceRecordKind;
use crate::serde_utils::truncate_to_millis;
use crate::types::{GroupId, Offset, ProducerIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Envelope version written by this build
pub const SNAPSHOT_VERSION: u8 = 1;

/// Oldest envelope version able to read what this build writes
pub const SNAPSHOT_COMPAT_VERSION: u8 = 0;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u8,
    compat_version: u8,
    offset: Offset,
    checksum: u32,
    payload: Vec<u8>,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    active_version: Option<u16>,
    ledger: &'a Ledger,
}

#[derive(Deserialize)]
struct PayloadV1 {
    active_version: Option<u16>,
    ledger: Ledger,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GroupStateV0 {
    begin_offsets: BTreeSet<Offset>,
    producer_to_begin_deprecated: BTreeMap<ProducerIdentity, Offset>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PayloadV0 {
    groups: BTreeMap<GroupId, GroupStateV0>,
}

/// Decoded tracker state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotState {
    /// Last offset reflected by the ledger
    pub offset: Offset,
    pub active_version: Option<u16>,
    pub ledger: Ledger,
}

/// Encode the tracker state as of `offset`
pub fn encode(
    offset: Offset,
    active_version: Option<u16>,
    ledger: &Ledger,
    max_size: usize,
) -> Result<Bytes> {
    let payload = postcard::to_allocvec(&PayloadRef {
        active_version,
        ledger,
    })?;

    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        compat_version: SNAPSHOT_COMPAT_VERSION,
        offset,
        checksum: crc32fast::hash(&payload),
        payload,
    };
    let data = postcard::to_allocvec(&envelope)?;

    if data.len() > max_size {
        return Err(TrackerError::SnapshotTooLarge {
            size: data.len(),
            max: max_size,
        });
    }

    debug!(
        offset,
        groups = ledger.group_count(),
        size_bytes = data.len(),
        "Encoded group transaction snapshot"
    );
    Ok(Bytes::from(data))
}

/// Decode a snapshot written by any compatible version.
///
/// Legacy entries migrated from the deprecated map get `now` as their begin
/// timestamp and `legacy_timeout` as their timeout.
pub fn decode(
    data: &[u8],
    max_size: usize,
    now: SystemTime,
    legacy_timeout: Duration,
) -> Result<SnapshotState> {
    if data.len() > max_size {
        return Err(TrackerError::SnapshotTooLarge {
            size: data.len(),
            max: max_size,
        });
    }

    let envelope: SnapshotEnvelope = postcard::from_bytes(data)
        .map_err(|e| TrackerError::CorruptSnapshot(format!("envelope: {}", e)))?;

    if envelope.compat_version > SNAPSHOT_VERSION {
        return Err(TrackerError::UnsupportedSnapshotVersion {
            version: envelope.version,
            compat_version: envelope.compat_version,
            supported: SNAPSHOT_VERSION,
        });
    }

    let checksum = crc32fast::hash(&envelope.payload);
    if checksum != envelope.checksum {
        return Err(TrackerError::CorruptSnapshot(format!(
            "checksum mismatch: expected {:#010x}, computed {:#010x}",
            envelope.checksum, checksum
        )));
    }

    let (active_version, groups) = if envelope.version == 0 {
        let (payload, _rest): (PayloadV0, _) = postcard::take_from_bytes(&envelope.payload)
            .map_err(|e| TrackerError::CorruptSnapshot(format!("v0 payload: {}", e)))?;
        let groups = payload
            .groups
            .into_iter()
            .map(|(group, v0)| {
                let state = PerGroupState {
                    begin_offsets: v0.begin_offsets,
                    legacy_producer_begin: v0.producer_to_begin_deprecated,
                    producer_states: BTreeMap::new(),
                };
                (group, state)
            })
            .collect::<BTreeMap<_, _>>();
        (None, groups)
    } else {
        let (payload, _rest): (PayloadV1, _) = postcard::take_from_bytes(&envelope.payload)
            .map_err(|e| TrackerError::CorruptSnapshot(format!("payload: {}", e)))?;
        (payload.active_version, payload.ledger.into_groups())
    };

    let now = truncate_to_millis(now);
    let legacy_timeout = Duration::from_millis(legacy_timeout.as_millis() as u64);
    let mut migrated = BTreeMap::new();
    for (group, state) in groups {
        let state = fold_deprecated(&group, state, now, legacy_timeout)
            .map_err(|e| TrackerError::CorruptSnapshot(e.to_string()))?;
        if !state.is_empty() {
            migrated.insert(group, state);
        }
    }

    let ledger = Ledger::from_groups(migrated);
    info!(
        version = envelope.version,
        offset = envelope.offset,
        groups = ledger.group_count(),
        open_transactions = ledger.open_transactions(),
        "Decoded group transaction snapshot"
    );

    Ok(SnapshotState {
        offset: envelope.offset,
        active_version,
        ledger,
    })
}

/// Turn deprecated-only entries into legacy fence transactions and drop begin
/// offsets no producer owns.
fn fold_deprecated(
    group: &str,
    mut state: PerGroupState,
    now: SystemTime,
    timeout: Duration,
) -> Result<PerGroupState> {
    let missing: Vec<(ProducerIdentity, Offset)> = state
        .legacy_producer_begin
        .iter()
        .filter(|(pid, _)| !state.producer_states.contains_key(pid))
        .map(|(pid, offset)| (*pid, *offset))
        .collect();

    for (pid, _) in &missing {
        state.legacy_producer_begin.remove(pid);
    }

    for (producer, begin_offset) in missing {
        let tx = ProducerTxState {
            fence_kind: FenceRecordKind::TxFence,
            begin_offset,
            begin_timestamp: now,
            timeout,
        };
        match state.begin_tx(group, producer, tx)? {
            BeginOutcome::Stale { current } => {
                warn!(group = %group, producer = %producer, current = %current, begin_offset, "Dropping deprecated entry superseded by a newer epoch");
            }
            _ => {
                debug!(group = %group, producer = %producer, begin_offset, "Migrated deprecated entry to legacy fence transaction");
            }
        }
    }

    let referenced: BTreeSet<Offset> = state
        .producer_states
        .values()
        .map(|tx| tx.begin_offset)
        .collect();
    let orphans: Vec<Offset> = state
        .begin_offsets
        .difference(&referenced)
        .copied()
        .collect();
    if !orphans.is_empty() {
        warn!(group = %group, ?orphans, "Dropping begin offsets without a tracked producer");
        for offset in &orphans {
            state.begin_offsets.remove(offset);
        }
    }

    state.check_invariants(group)?;
    Ok(state)
}

// ==================== Snapshot Stores ====================

/// Durable storage for local snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist an encoded snapshot taken at `offset`
    async fn persist(&self, offset: Offset, data: Bytes) -> Result<()>;

    /// Most recent persisted snapshot, if any
    async fn load_latest(&self) -> Result<Option<(Offset, Bytes)>>;

    /// Most recent persisted snapshot taken strictly before `offset`
    async fn load_before(&self, offset: Offset) -> Result<Option<(Offset, Bytes)>>;
}

/// Snapshots as `snapshot-{offset}.snap` files in one directory.
///
/// Files are written to a temporary name and renamed into place, so a crash
/// never leaves a partially written snapshot behind under the final name.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    keep: usize,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            dir: dir.into(),
            keep: keep.max(1),
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn path_for(&self, offset: Offset) -> PathBuf {
        self.dir.join(format!("snapshot-{}.snap", offset))
    }

    fn tmp_path_for(&self, offset: Offset) -> PathBuf {
        self.dir.join(format!("snapshot-{}.snap.tmp", offset))
    }

    /// Files named `snapshot-{offset}.{ext}`, ascending by offset
    async fn list_with_extension(&self, ext: &str) -> Vec<(Offset, PathBuf)> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let suffix = format!(".{}", ext);
        let mut snaps = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(offset) = name
                .strip_prefix("snapshot-")
                .and_then(|s| s.strip_suffix(suffix.as_str()))
                .and_then(|s| s.parse::<Offset>().ok())
            {
                snaps.push((offset, path));
            }
        }

        snaps.sort_by_key(|(offset, _)| *offset);
        snaps
    }

    /// Snapshot files in the directory, ascending by offset
    async fn list(&self) -> Vec<(Offset, PathBuf)> {
        self.list_with_extension("snap").await
    }

    async fn read(&self, offset: Offset, path: &std::path::Path) -> Result<(Offset, Bytes)> {
        let data = tokio::fs::read(path).await?;
        debug!(offset, size_bytes = data.len(), path = %path.display(), "Read snapshot file");
        Ok((offset, Bytes::from(data)))
    }

    /// Remove old snapshot files, keeping the `keep` most recent, and
    /// temporary files a crashed writer left below the newest snapshot
    async fn cleanup(&self) {
        let snaps = self.list().await;
        let newest = snaps.last().map(|(offset, _)| *offset);

        let to_remove = snaps.len().saturating_sub(self.keep);
        for (_, path) in snaps.into_iter().take(to_remove) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove old snapshot");
            } else {
                debug!(path = %path.display(), "Removed old snapshot file");
            }
        }

        let Some(newest) = newest else {
            return;
        };
        for (offset, path) in self.list_with_extension("snap.tmp").await {
            if offset >= newest {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove stale snapshot temp file");
            } else {
                debug!(path = %path.display(), "Removed stale snapshot temp file");
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn persist(&self, offset: Offset, data: Bytes) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(offset);
        let tmp_path = self.tmp_path_for(offset);
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        info!(
            offset,
            size_bytes = data.len(),
            path = %path.display(),
            "Persisted group transaction snapshot"
        );

        self.cleanup().await;
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<(Offset, Bytes)>> {
        let Some((offset, path)) = self.list().await.pop() else {
            debug!("No snapshot files found in {}", self.dir.display());
            return Ok(None);
        };
        self.read(offset, &path).await.map(Some)
    }

    async fn load_before(&self, before: Offset) -> Result<Option<(Offset, Bytes)>> {
        let older = self
            .list()
            .await
            .into_iter()
            .rev()
            .find(|(offset, _)| *offset < before);
        match older {
            Some((offset, path)) => self.read(offset, &path).await.map(Some),
            None => Ok(None),
        }
    }
}

/// In-memory snapshot store for tests and embedded use
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<BTreeMap<Offset, Bytes>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained snapshots
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn persist(&self, offset: Offset, data: Bytes) -> Result<()> {
        self.snapshots.lock().insert(offset, data);
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<(Offset, Bytes)>> {
        Ok(self
            .snapshots
            .lock()
            .last_key_value()
            .map(|(offset, data)| (*offset, data.clone())))
    }

    async fn load_before(&self, offset: Offset) -> Result<Option<(Offset, Bytes)>> {
        Ok(self
            .snapshots
            .lock()
            .range(..offset)
            .next_back()
            .map(|(offset, data)| (*offset, data.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    const MAX: usize = 1024 * 1024;

    fn pid(id: u64, epoch: u16) -> ProducerIdentity {
        ProducerIdentity::new(id, epoch)
    }

    fn tx(kind: FenceRecordKind, begin: Offset) -> ProducerTxState {
        ProducerTxState {
            fence_kind: kind,
            begin_offset: begin,
            begin_timestamp: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
            timeout: Duration::from_secs(30),
        }
    }

    fn sample_ledger() -> Ledger {
        let mut ledger = Ledger::new();
        ledger
            .group_entry("payments")
            .begin_tx("payments", pid(7, 2), tx(FenceRecordKind::GroupFence, 150))
            .unwrap();
        ledger
            .group_entry("payments")
            .begin_tx("payments", pid(9, 0), tx(FenceRecordKind::TxFence, 100))
            .unwrap();
        ledger
            .group_entry("audit")
            .begin_tx("audit", pid(3, 1), tx(FenceRecordKind::GroupFence, 120))
            .unwrap();
        ledger
    }

    fn envelope_bytes(version: u8, compat_version: u8, offset: Offset, payload: Vec<u8>) -> Vec<u8> {
        postcard::to_allocvec(&SnapshotEnvelope {
            version,
            compat_version,
            offset,
            checksum: crc32fast::hash(&payload),
            payload,
        })
        .unwrap()
    }

    fn encode_v0(offset: Offset, groups: BTreeMap<GroupId, GroupStateV0>) -> Vec<u8> {
        let payload = postcard::to_allocvec(&PayloadV0 { groups }).unwrap();
        envelope_bytes(0, 0, offset, payload)
    }

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_800_000_000)
    }

    #[test]
    fn test_roundtrip_preserves_ledger() {
        let ledger = sample_ledger();
        let data = encode(200, Some(2), &ledger, MAX).unwrap();
        let state = decode(&data, MAX, now(), Duration::from_secs(60)).unwrap();

        assert_eq!(state.offset, 200);
        assert_eq!(state.active_version, Some(2));
        assert_eq!(state.ledger, ledger);
    }

    #[test]
    fn test_empty_ledger_roundtrip() {
        let data = encode(5, None, &Ledger::new(), MAX).unwrap();
        let state = decode(&data, MAX, now(), Duration::from_secs(60)).unwrap();
        assert!(state.ledger.is_empty());
        assert_eq!(state.offset, 5);
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let mut envelope: SnapshotEnvelope =
            postcard::from_bytes(&encode(10, None, &sample_ledger(), MAX).unwrap()).unwrap();
        envelope.payload[0] ^= 0xff;
        let data = postcard::to_allocvec(&envelope).unwrap();

        let err = decode(&data, MAX, now(), Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, TrackerError::CorruptSnapshot(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_truncated_snapshot_is_corrupt() {
        let data = encode(10, None, &sample_ledger(), MAX).unwrap();
        let err = decode(&data[..data.len() / 2], MAX, now(), Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, TrackerError::CorruptSnapshot(_)));
    }

    #[test]
    fn test_future_compat_version_is_fatal() {
        let data = envelope_bytes(3, 2, 10, vec![0]);
        let err = decode(&data, MAX, now(), Duration::from_secs(60)).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::UnsupportedSnapshotVersion {
                version: 3,
                compat_version: 2,
                supported: SNAPSHOT_VERSION
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_newer_writer_with_trailing_fields_is_readable() {
        let ledger = sample_ledger();
        let mut payload = postcard::to_allocvec(&PayloadRef {
            active_version: Some(3),
            ledger: &ledger,
        })
        .unwrap();
        payload.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let data = envelope_bytes(2, 1, 77, payload);
        let state = decode(&data, MAX, now(), Duration::from_secs(60)).unwrap();
        assert_eq!(state.ledger, ledger);
        assert_eq!(state.active_version, Some(3));
    }

    #[test]
    fn test_v0_snapshot_migrates_deprecated_entries() {
        let mut groups = BTreeMap::new();
        groups.insert(
            "legacy".to_string(),
            GroupStateV0 {
                begin_offsets: [40, 55, 90].into_iter().collect(),
                producer_to_begin_deprecated: [(pid(1, 0), 40), (pid(2, 3), 55)]
                    .into_iter()
                    .collect(),
            },
        );
        groups.insert(
            "orphaned".to_string(),
            GroupStateV0 {
                begin_offsets: [12].into_iter().collect(),
                producer_to_begin_deprecated: BTreeMap::new(),
            },
        );

        let state = decode(&encode_v0(99, groups), MAX, now(), Duration::from_secs(45)).unwrap();

        assert_eq!(state.offset, 99);
        assert_eq!(state.active_version, None);
        assert_eq!(state.ledger.group_count(), 1);
        assert_eq!(state.ledger.min_begin_offset(), Some(40));

        let group = state.ledger.group("legacy").unwrap();
        assert_eq!(group.begin_offsets.iter().copied().collect::<Vec<_>>(), vec![40, 55]);
        let migrated = &group.producer_states[&pid(2, 3)];
        assert_eq!(migrated.fence_kind, FenceRecordKind::TxFence);
        assert_eq!(migrated.begin_timestamp, now());
        assert_eq!(migrated.timeout, Duration::from_secs(45));
        assert_eq!(group.legacy_producer_begin.len(), 2);
        state.ledger.check_invariants().unwrap();
    }

    #[test]
    fn test_v0_duplicate_epochs_keep_newest() {
        let mut groups = BTreeMap::new();
        groups.insert(
            "g".to_string(),
            GroupStateV0 {
                begin_offsets: [10, 20].into_iter().collect(),
                producer_to_begin_deprecated: [(pid(5, 1), 10), (pid(5, 2), 20)]
                    .into_iter()
                    .collect(),
            },
        );

        let state = decode(&encode_v0(30, groups), MAX, now(), Duration::from_secs(60)).unwrap();
        let group = state.ledger.group("g").unwrap();
        assert_eq!(group.producer_states.len(), 1);
        assert!(group.producer_states.contains_key(&pid(5, 2)));
        assert_eq!(state.ledger.min_begin_offset(), Some(20));
    }

    #[test]
    fn test_size_limit_enforced_both_ways() {
        let ledger = sample_ledger();
        assert!(matches!(
            encode(1, None, &ledger, 8),
            Err(TrackerError::SnapshotTooLarge { max: 8, .. })
        ));

        let data = encode(1, None, &ledger, MAX).unwrap();
        assert!(matches!(
            decode(&data, 8, now(), Duration::from_secs(60)),
            Err(TrackerError::SnapshotTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_store_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snaps"), 2);

        assert!(store.load_latest().await.unwrap().is_none());

        for offset in [5, 50, 15] {
            store
                .persist(offset, Bytes::from(format!("snap-{}", offset)))
                .await
                .unwrap();
        }

        let (offset, data) = store.load_latest().await.unwrap().unwrap();
        assert_eq!(offset, 50);
        assert_eq!(&data[..], b"snap-50");

        let files = store.list().await;
        assert_eq!(
            files.iter().map(|(o, _)| *o).collect::<Vec<_>>(),
            vec![15, 50]
        );
        assert!(!dir.path().join("snaps/snapshot-50.snap.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_removes_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        // a writer crashed between write and rename at offsets 7 and 90
        std::fs::write(dir.path().join("snapshot-7.snap.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("snapshot-90.snap.tmp"), b"partial").unwrap();

        let store = FileSnapshotStore::new(dir.path(), 2);
        store.persist(40, Bytes::from_static(b"snap-40")).await.unwrap();

        assert!(!dir.path().join("snapshot-7.snap.tmp").exists());
        // may still be renamed into place by a writer ahead of us
        assert!(dir.path().join("snapshot-90.snap.tmp").exists());

        store.persist(120, Bytes::from_static(b"snap-120")).await.unwrap();
        assert!(!dir.path().join("snapshot-90.snap.tmp").exists());
        assert_eq!(
            store.list().await.iter().map(|(o, _)| *o).collect::<Vec<_>>(),
            vec![40, 120]
        );
    }

    #[tokio::test]
    async fn test_file_store_loads_older_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), 3);
        for offset in [10, 20, 30] {
            store
                .persist(offset, Bytes::from(format!("snap-{}", offset)))
                .await
                .unwrap();
        }

        let (offset, data) = store.load_before(30).await.unwrap().unwrap();
        assert_eq!(offset, 20);
        assert_eq!(&data[..], b"snap-20");
        assert_eq!(store.load_before(25).await.unwrap().unwrap().0, 20);
        assert!(store.load_before(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("snapshot-abc.snap"), b"x").unwrap();
        std::fs::write(dir.path().join("snapshot-9.snap.tmp"), b"x").unwrap();

        let store = FileSnapshotStore::new(dir.path(), 3);
        assert!(store.load_latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_latest() {
        let store = MemorySnapshotStore::new();
        assert!(store.is_empty());
        store.persist(3, Bytes::from_static(b"a")).await.unwrap();
        store.persist(1, Bytes::from_static(b"b")).await.unwrap();

        let (offset, data) = store.load_latest().await.unwrap().unwrap();
        assert_eq!(offset, 3);
        assert_eq!(&data[..], b"a");
        assert_eq!(store.len(), 2);

        let (offset, data) = store.load_before(3).await.unwrap().unwrap();
        assert_eq!(offset, 1);
        assert_eq!(&data[..], b"b");
        assert!(store.load_before(1).await.unwrap().is_none());
    }
}
