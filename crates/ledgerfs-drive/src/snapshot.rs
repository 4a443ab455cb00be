//! Snapshots
//!
//! A snapshot is the serialized state of a root as of one sequence number.
//! The image goes through the indirection layer like file content, and a
//! sealed index record pointing at it is appended to the root's snapshot
//! stream. The last record in that stream is the current snapshot.

use std::sync::Arc;

use bytes::Bytes;
use ledgerfs_core::{AppendOutcome, ContentLocator, CoreError, ExpectedVersion, RemoteLog};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::codec::EventCodec;
use crate::error::{DriveError, DriveResult};
use crate::indirection::ContentIndirection;
use crate::network::{EventStream, NetworkEventService};
use crate::state::MaterializedState;

/// Serialized state at one sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub sequence_nr: u64,
    pub serialized_state: Bytes,
}

impl Snapshot {
    /// Capture `state`; `None` if nothing has been applied to it
    pub fn of(state: &MaterializedState) -> DriveResult<Option<Self>> {
        let Some(sequence_nr) = state.last_applied() else {
            return Ok(None);
        };
        Ok(Some(Self {
            sequence_nr,
            serialized_state: state.to_bytes()?,
        }))
    }

    /// Rebuild the captured state
    pub fn state(&self) -> DriveResult<MaterializedState> {
        let state = MaterializedState::from_bytes(&self.serialized_state)?;
        if state.last_applied() != Some(self.sequence_nr) {
            return Err(DriveError::Remote(CoreError::Corrupt(format!(
                "snapshot {} holds state at {:?}",
                self.sequence_nr,
                state.last_applied()
            ))));
        }
        Ok(state)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    sequence_nr: u64,
    locator: ContentLocator,
}

/// Builds, publishes and restores snapshots of one root
#[derive(Clone)]
pub struct SnapshotManager {
    log: Arc<dyn RemoteLog>,
    network: NetworkEventService,
    indirection: ContentIndirection,
    codec: EventCodec,
    stream: String,
}

impl SnapshotManager {
    pub fn new(
        log: Arc<dyn RemoteLog>,
        network: NetworkEventService,
        indirection: ContentIndirection,
        codec: EventCodec,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            log,
            network,
            indirection,
            codec,
            stream: stream.into(),
        }
    }

    /// Advance `previous` by `changes` and publish the result
    ///
    /// With no changes nothing is published and `previous` is returned
    /// as is, so repeating a snapshot over the same inputs is a no-op.
    #[instrument(skip_all, fields(stream = %self.stream))]
    pub async fn snapshot(
        &self,
        previous: Option<Snapshot>,
        mut changes: EventStream,
    ) -> DriveResult<Option<Snapshot>> {
        let mut state = match &previous {
            Some(snapshot) => snapshot.state()?,
            None => MaterializedState::new(),
        };

        let mut applied = 0usize;
        while let Some(event) = changes.next().await? {
            state.apply(&event)?;
            applied += 1;
        }
        if applied == 0 {
            debug!("No new events, keeping previous snapshot");
            return Ok(previous);
        }

        let Some(snapshot) = Snapshot::of(&state)? else {
            return Ok(previous);
        };
        self.publish(&snapshot).await?;
        info!(seq = snapshot.sequence_nr, applied, "Snapshot published");
        Ok(Some(snapshot))
    }

    /// Snapshot everything the remote stream holds beyond the latest snapshot
    pub async fn take(&self) -> DriveResult<Option<Snapshot>> {
        let previous = self.latest().await?;
        let changes = self.network.load(previous.as_ref().map(|s| s.sequence_nr));
        self.snapshot(previous, changes).await
    }

    /// Store the image and append its index record
    pub async fn publish(&self, snapshot: &Snapshot) -> DriveResult<()> {
        let locator = self
            .indirection
            .locate(snapshot.serialized_state.clone())
            .await?;
        let record = SnapshotRecord {
            sequence_nr: snapshot.sequence_nr,
            locator,
        };
        let sealed = self.codec.seal(&record)?;
        match self
            .log
            .append(&self.stream, ExpectedVersion::Any, sealed)
            .await?
        {
            AppendOutcome::Success { version } => {
                debug!(version, seq = snapshot.sequence_nr, "Snapshot record appended");
                Ok(())
            }
            AppendOutcome::VersionConflict { current } => Err(DriveError::VersionConflict {
                sequence_nr: snapshot.sequence_nr,
                current,
            }),
        }
    }

    /// The most recently published snapshot
    pub async fn latest(&self) -> DriveResult<Option<Snapshot>> {
        let Some(last) = self.log.last_version(&self.stream).await? else {
            return Ok(None);
        };
        let records = self.log.read(&self.stream, last.checked_sub(1), 1).await?;
        let Some(record) = records.into_iter().next() else {
            return Ok(None);
        };

        let index: SnapshotRecord = self.codec.open(&record.data)?;
        let serialized_state = self.indirection.resolve(&index.locator).await?;
        Ok(Some(Snapshot {
            sequence_nr: index.sequence_nr,
            serialized_state,
        }))
    }

    /// Latest snapshot plus every remote event after it
    #[instrument(skip_all, fields(stream = %self.stream))]
    pub async fn restore(&self) -> DriveResult<MaterializedState> {
        let (mut state, base) = match self.latest().await? {
            Some(snapshot) => (snapshot.state()?, Some(snapshot.sequence_nr)),
            None => (MaterializedState::new(), None),
        };

        let mut tail = self.network.load(base);
        let mut replayed = 0usize;
        while let Some(event) = tail.next().await? {
            state.apply(&event)?;
            replayed += 1;
        }

        info!(snapshot = ?base, replayed, last_applied = ?state.last_applied(), "State restored");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerfs_core::{ItemId, LocalEvent};
    use ledgerfs_crypto::DriveKey;
    use ledgerfs_storage::{MemoryBlobStore, MemoryRemoteLog, WalEntry};

    struct Fixture {
        manager: SnapshotManager,
        network: NetworkEventService,
        codec: EventCodec,
        log: Arc<MemoryRemoteLog>,
    }

    fn fixture(threshold: usize) -> Fixture {
        let codec = EventCodec::new(DriveKey::generate());
        let log = Arc::new(MemoryRemoteLog::new());
        let indirection = ContentIndirection::new(
            Arc::new(MemoryBlobStore::new()),
            codec.clone(),
            threshold,
            256,
        );
        let network =
            NetworkEventService::new(log.clone(), indirection.clone(), codec.clone(), "r", 8);
        let manager = SnapshotManager::new(
            log.clone(),
            network.clone(),
            indirection,
            codec.clone(),
            "r#snapshots",
        );
        Fixture {
            manager,
            network,
            codec,
            log,
        }
    }

    async fn push_dirs(f: &Fixture, range: std::ops::Range<u64>) {
        for seq in range {
            let event = LocalEvent::DirectoryItemCreated {
                sequence_nr: seq,
                item_id: ItemId::generate(),
                parent_id: ItemId::ROOT,
                name: format!("d{}", seq),
            };
            let entry = WalEntry::pending(seq, f.codec.seal(&event).unwrap());
            f.network.upload(&entry).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_stream_has_nothing_to_snapshot() {
        let f = fixture(20_000);
        assert!(f.manager.take().await.unwrap().is_none());
        assert!(f.manager.latest().await.unwrap().is_none());
        assert_eq!(f.manager.restore().await.unwrap(), MaterializedState::new());
    }

    #[tokio::test]
    async fn test_restore_uses_snapshot_and_tail() {
        let f = fixture(20_000);
        push_dirs(&f, 0..3).await;
        let snap = f.manager.take().await.unwrap().unwrap();
        assert_eq!(snap.sequence_nr, 2);

        push_dirs(&f, 3..5).await;
        let restored = f.manager.restore().await.unwrap();
        assert_eq!(restored.last_applied(), Some(4));
        assert_eq!(restored.tree().len(), 6);

        let replayed = {
            let mut state = MaterializedState::new();
            let events = f.network.load(None).collect().await.unwrap();
            state.materialize(&events).unwrap();
            state
        };
        assert_eq!(restored, replayed);
    }

    #[tokio::test]
    async fn test_repeat_snapshot_publishes_once() {
        let f = fixture(20_000);
        push_dirs(&f, 0..2).await;
        let first = f.manager.take().await.unwrap();
        let second = f.manager.take().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.log.stream_len("r#snapshots"), 1);
    }

    #[tokio::test]
    async fn test_large_image_goes_indirect() {
        let f = fixture(64);
        push_dirs(&f, 0..10).await;
        let snap = f.manager.take().await.unwrap().unwrap();
        assert!(snap.serialized_state.len() >= 64);

        let latest = f.manager.latest().await.unwrap().unwrap();
        assert_eq!(latest, snap);
    }

    #[tokio::test]
    async fn test_mismatched_snapshot_rejected() {
        let mut state = MaterializedState::new();
        state
            .apply(&LocalEvent::DirectoryItemCreated {
                sequence_nr: 0,
                item_id: ItemId::generate(),
                parent_id: ItemId::ROOT,
                name: "a".into(),
            })
            .unwrap();
        let mut snap = Snapshot::of(&state).unwrap().unwrap();
        snap.sequence_nr = 9;
        assert!(snap.state().is_err());
    }
}
