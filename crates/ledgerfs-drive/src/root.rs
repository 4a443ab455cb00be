//! A mounted root
//!
//! [`RootContext`] is the per-root handle adapters work with. It owns the
//! root's durable queue, its two materialized states and its uploader task.
//!
//! The two states are kept side by side under one lock:
//! - `confirmed` holds remote history only, up to the last entry the remote
//!   accepted
//! - `live` is `confirmed` plus every pending local event, and is what
//!   reads see
//!
//! Mutations advance `live` and the queue together. The uploader advances
//! `confirmed` as entries land. A rebase rebuilds `live` from `confirmed`
//! and the queue's pending rows, which is how conflicts, resynchronization
//! and startup all converge on the same state.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use ledgerfs_core::{BlobStore, ItemId, LocalEvent, NetworkEvent, RemoteLog, RootId};
use ledgerfs_crypto::DriveKey;
use ledgerfs_logging::RootContextGuard;
use ledgerfs_storage::{DurableQueue, QueueConfig, WalEntry};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::codec::EventCodec;
use crate::config::DriveConfig;
use crate::conflict::{ConflictResolver, RebasePlan, RebaseReport, same_change};
use crate::error::{DriveError, DriveResult};
use crate::indirection::ContentIndirection;
use crate::mutation::{Mutation, MutationReceipt};
use crate::network::NetworkEventService;
use crate::snapshot::{Snapshot, SnapshotManager};
use crate::state::{ItemDescriptor, MaterializedState};
use crate::transactor::EventTransactor;
use crate::tree::{FileContent, TreeError};
use crate::uploader::{QueueUploader, UploaderStatus};

/// External services a root talks to
#[derive(Clone)]
pub struct Collaborators {
    pub blobs: Arc<dyn BlobStore>,
    pub log: Arc<dyn RemoteLog>,
    pub key: DriveKey,
}

impl Collaborators {
    pub fn new(blobs: Arc<dyn BlobStore>, log: Arc<dyn RemoteLog>, key: DriveKey) -> Self {
        Self { blobs, log, key }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RootState {
    pub live: MaterializedState,
    pub confirmed: MaterializedState,
}

/// What a rebase starts from
pub(crate) enum RebaseBase {
    /// The current confirmed state advanced by freshly fetched events
    Advance(Vec<NetworkEvent>),
    /// A state rebuilt from the remote
    Replace(MaterializedState),
}

/// State shared between a root's handle and its uploader
pub(crate) struct RootShared {
    root: RootId,
    mount_id: Uuid,
    config: DriveConfig,
    state: Mutex<RootState>,
    queue: Arc<DurableQueue>,
    transactor: EventTransactor,
    network: NetworkEventService,
    resolver: ConflictResolver,
    snapshots: SnapshotManager,
    indirection: ContentIndirection,
    codec: EventCodec,
    content_cache: DashMap<[u8; 32], Bytes>,
    failed: DashMap<ItemId, String>,
    status: watch::Sender<UploaderStatus>,
}

impl RootShared {
    pub fn root_id(&self) -> &RootId {
        &self.root
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    pub fn network(&self) -> &NetworkEventService {
        &self.network
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn set_status(&self, status: UploaderStatus) {
        self.status.send_replace(status);
    }

    /// Last remote event folded into the confirmed state
    pub fn confirmed_last(&self) -> Option<u64> {
        self.state.lock().confirmed.last_applied()
    }

    /// Record that the remote accepted `entry`
    pub fn confirm(&self, entry: &WalEntry) -> DriveResult<()> {
        let event: LocalEvent = self.codec.open(&entry.encrypted_payload)?;
        let mut state = self.state.lock();
        self.queue.mark_persisted(entry.sequence_nr)?;
        state.confirmed.apply(&event)?;
        debug!(seq = entry.sequence_nr, "Entry confirmed");
        Ok(())
    }

    /// Replay every pending entry on a new confirmed state
    ///
    /// Runs entirely under the state lock, so no mutation interleaves. The
    /// queue's pending rows are replaced with the renumbered ones; entries
    /// that no longer apply are dropped and recorded as failed.
    pub fn rebase(
        &self,
        base: RebaseBase,
        doomed: Option<(u64, String)>,
    ) -> DriveResult<RebaseReport> {
        let mut state = self.state.lock();
        let confirmed = match base {
            RebaseBase::Advance(fetched) => {
                let mut confirmed = state.confirmed.clone();
                confirmed.materialize(&fetched)?;
                confirmed
            }
            RebaseBase::Replace(restored) => restored,
        };

        let pending = self.queue.pending_entries()?;
        let plan = RebasePlan::build(&self.codec, confirmed, &pending, doomed)?;
        self.queue.rewrite_pending(&plan.entries)?;

        for dropped in &plan.dropped {
            error!(
                root = %self.root,
                seq = dropped.sequence_nr,
                item = %dropped.item,
                reason = %dropped.reason,
                "Pending change dropped"
            );
            self.failed.insert(dropped.item, dropped.reason.clone());
        }
        info!(
            root = %self.root,
            confirmed = ?plan.confirmed.last_applied(),
            live = ?plan.live.last_applied(),
            kept = plan.entries.len(),
            dropped = plan.dropped.len(),
            "Pending entries rebased"
        );

        *state = RootState {
            live: plan.live,
            confirmed: plan.confirmed,
        };
        Ok(RebaseReport {
            renumbered: plan.renumbered,
            dropped: plan.dropped,
        })
    }

    /// Rebuild the confirmed state from the remote and rebase onto it
    #[instrument(skip(self, doomed), fields(root = %self.root))]
    pub async fn resync(&self, doomed: Option<(u64, String)>) -> DriveResult<RebaseReport> {
        let restored = self.snapshots.restore().await?;
        self.rebase(RebaseBase::Replace(restored), doomed)
    }

    fn ensure_writable(&self) -> DriveResult<()> {
        match &*self.status.borrow() {
            UploaderStatus::Failed { reason } => {
                return Err(DriveError::ReplicationHalted(reason.clone()));
            }
            UploaderStatus::Stopped => return Err(DriveError::Unmounted(self.root.key())),
            _ => {}
        }
        if self.queue.is_closed() {
            return Err(DriveError::Unmounted(self.root.key()));
        }
        Ok(())
    }

    fn check_failed(&self, event: &LocalEvent) -> DriveResult<()> {
        for item in event.referenced_items() {
            if let Some(reason) = self.failed.get(&item) {
                return Err(DriveError::PermanentConflict {
                    item,
                    reason: reason.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Handle to one mounted root
pub struct RootContext {
    shared: Arc<RootShared>,
    status: watch::Receiver<UploaderStatus>,
    cancel: CancellationToken,
    uploader: Mutex<Option<JoinHandle<()>>>,
}

impl RootContext {
    /// Mount `root`
    ///
    /// Opens the root's queue, restores the remote state, settles pending
    /// rows the remote already holds, replays the rest on top and starts
    /// the uploader. `cancel` stops the uploader when cancelled.
    #[instrument(skip(config, collaborators, cancel), fields(root = %root))]
    pub async fn open(
        root: RootId,
        config: DriveConfig,
        collaborators: &Collaborators,
        cancel: CancellationToken,
    ) -> DriveResult<Self> {
        let mount_id = Uuid::new_v4();
        let queue = Arc::new(DurableQueue::open(QueueConfig::for_root(
            &config.storage_dir,
            &root.file_stem(),
        ))?);

        let codec = EventCodec::new(collaborators.key.clone());
        let indirection = ContentIndirection::new(
            collaborators.blobs.clone(),
            codec.clone(),
            config.indirection_threshold,
            config.chunk_size,
        );
        let network = NetworkEventService::new(
            collaborators.log.clone(),
            indirection.clone(),
            codec.clone(),
            root.key(),
            config.read_page_size,
        );
        let snapshots = SnapshotManager::new(
            collaborators.log.clone(),
            network.clone(),
            indirection.clone(),
            codec.clone(),
            root.snapshot_stream(),
        );

        let restored = snapshots.restore().await?;
        let settled = settle_uploaded(&queue, &network, &codec, restored.last_applied()).await?;

        let (status_tx, status_rx) = watch::channel(UploaderStatus::Starting);
        let shared = Arc::new(RootShared {
            transactor: EventTransactor::new(queue.clone(), codec.clone()),
            resolver: ConflictResolver::new(network.clone(), codec.clone()),
            state: Mutex::new(RootState {
                live: restored.clone(),
                confirmed: restored.clone(),
            }),
            root,
            mount_id,
            config,
            queue,
            network,
            snapshots,
            indirection,
            codec,
            content_cache: DashMap::new(),
            failed: DashMap::new(),
            status: status_tx,
        });

        let report = shared.rebase(RebaseBase::Replace(restored), None)?;
        info!(
            mount_id = %mount_id,
            settled,
            pending = report.renumbered.len(),
            dropped = report.dropped.len(),
            "Root mounted"
        );

        let uploader = QueueUploader::spawn(shared.clone(), cancel.clone());
        Ok(Self {
            shared,
            status: status_rx,
            cancel,
            uploader: Mutex::new(Some(uploader)),
        })
    }

    pub fn root_id(&self) -> &RootId {
        &self.shared.root
    }

    /// Unique id of this mount
    pub fn mount_id(&self) -> Uuid {
        self.shared.mount_id
    }

    /// Apply a mutation locally and queue it for upload
    ///
    /// The change is visible to reads as soon as this returns.
    pub fn mutate(&self, mutation: Mutation) -> DriveResult<MutationReceipt> {
        let shared = &self.shared;
        shared.ensure_writable()?;
        let _ctx = RootContextGuard::new(&shared.root, shared.mount_id);

        let mut state = shared.state.lock();
        let sequence_nr = state.live.next_sequence();
        let event = mutation.into_event(sequence_nr);
        shared.check_failed(&event)?;
        let item = shared.transactor.transact(&mut state.live, &event)?;
        Ok(MutationReceipt { sequence_nr, item })
    }

    /// Create a file and write its content
    ///
    /// The file is created empty first. If writing the content then fails
    /// and the failure is not an authorization failure, the empty file is
    /// removed again; either way the error says whether it was kept.
    #[instrument(skip(self, content), fields(root = %self.shared.root, len = content.len()))]
    pub async fn write_file(
        &self,
        parent: ItemId,
        name: &str,
        content: Bytes,
    ) -> DriveResult<ItemId> {
        let item = self
            .mutate(Mutation::CreateFile {
                parent,
                name: name.to_string(),
                content: Bytes::new(),
            })?
            .item;

        let written = async {
            if content.len() >= self.shared.indirection.threshold() {
                self.shared.indirection.locate(content.clone()).await?;
            }
            self.mutate(Mutation::SetContent { item, content })
        }
        .await;

        match written {
            Ok(_) => Ok(item),
            Err(e) if e.is_unauthorized() => {
                warn!(item = %item, error = %e, "Content write unauthorized, keeping empty file");
                Err(DriveError::ContentWrite {
                    item,
                    retained: true,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                warn!(item = %item, error = %e, "Content write failed, removing file");
                if let Err(undo) = self.mutate(Mutation::Remove {
                    item,
                    recursive: false,
                }) {
                    error!(item = %item, error = %undo, "Could not remove file after failed write");
                }
                Err(DriveError::ContentWrite {
                    item,
                    retained: false,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Describe one item
    pub fn get(&self, id: ItemId) -> Option<ItemDescriptor> {
        self.shared.state.lock().live.describe(id)
    }

    /// Children of a directory, by name
    pub fn list(&self, dir: ItemId) -> DriveResult<Vec<ItemDescriptor>> {
        let state = self.shared.state.lock();
        let children = state.live.tree().children(dir)?;
        Ok(children.into_iter().map(ItemDescriptor::from).collect())
    }

    /// Look an item up by its `/`-separated path
    pub fn resolve_path(&self, path: &str) -> Option<ItemId> {
        self.shared.state.lock().live.tree().resolve_path(path)
    }

    /// Path of an item
    pub fn path_of(&self, id: ItemId) -> Option<String> {
        self.shared.state.lock().live.tree().path_of(id)
    }

    /// Content of a file
    ///
    /// Content kept in blob storage is fetched on first read and cached.
    pub async fn read(&self, id: ItemId) -> DriveResult<Bytes> {
        let content = {
            let state = self.shared.state.lock();
            let node = state.live.tree().get(id).ok_or(TreeError::NotFound(id))?;
            node.content().cloned().ok_or(TreeError::NotAFile(id))?
        };

        match content {
            FileContent::Inline(data) => Ok(data),
            FileContent::Deferred(locator) => {
                if let Some(hit) = self.shared.content_cache.get(&locator.content_id) {
                    return Ok(hit.clone());
                }
                let data = self.shared.indirection.resolve(&locator).await?;
                self.shared
                    .content_cache
                    .insert(locator.content_id, data.clone());
                Ok(data)
            }
        }
    }

    /// A copy of the state reads see
    pub fn state(&self) -> MaterializedState {
        self.shared.state.lock().live.clone()
    }

    /// Last sequence number applied locally
    pub fn last_applied(&self) -> Option<u64> {
        self.shared.state.lock().live.last_applied()
    }

    /// Last sequence number the remote confirmed
    pub fn confirmed(&self) -> Option<u64> {
        self.shared.confirmed_last()
    }

    /// Queue rows not yet uploaded
    pub fn pending(&self) -> DriveResult<Vec<WalEntry>> {
        Ok(self.shared.queue.pending_entries()?)
    }

    /// Current uploader status
    pub fn status(&self) -> UploaderStatus {
        self.status.borrow().clone()
    }

    /// Watch the uploader status
    pub fn subscribe(&self) -> watch::Receiver<UploaderStatus> {
        self.status.clone()
    }

    /// Why changes to `item` were dropped, if they were
    pub fn failure(&self, item: ItemId) -> Option<String> {
        self.shared.failed.get(&item).map(|r| r.clone())
    }

    /// Allow mutations of a failed item again
    pub fn clear_failure(&self, item: ItemId) -> Option<String> {
        self.shared.failed.remove(&item).map(|(_, reason)| reason)
    }

    /// Wait until every pending row has been uploaded
    ///
    /// Returns `false` if rows are still pending after `timeout`.
    pub async fn wait_drained(&self, timeout: Duration) -> DriveResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.queue.oldest_pending()?.is_none() {
                return Ok(true);
            }
            self.shared.ensure_writable()?;
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Publish a snapshot of the remote stream
    pub async fn snapshot(&self) -> DriveResult<Option<Snapshot>> {
        self.shared.snapshots.take().await
    }

    /// Stop the uploader, wait for its cleanup and close the queue
    ///
    /// Releases the storage path even while other handles to this context
    /// are alive; they reject mutations with [`DriveError::Unmounted`]
    /// from then on. Rows still pending stay on disk for the next mount.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.uploader.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(root = %self.shared.root, error = %e, "Uploader task ended abnormally");
        }
        if self.shared.queue.close() {
            info!(root = %self.shared.root, "Root unmounted");
        }
    }
}

impl Drop for RootContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Mark pending rows the remote already holds as persisted
///
/// Covers uploads that landed before the process stopped but after the
/// row was last written. Returns how many rows were settled.
async fn settle_uploaded(
    queue: &DurableQueue,
    network: &NetworkEventService,
    codec: &EventCodec,
    remote_last: Option<u64>,
) -> DriveResult<usize> {
    let Some(remote_last) = remote_last else {
        return Ok(0);
    };

    let mut settled = 0;
    for entry in queue.pending_entries()? {
        if entry.sequence_nr > remote_last {
            break;
        }
        let local: LocalEvent = codec.open(&entry.encrypted_payload)?;
        let Some(remote) = network.event_at(entry.sequence_nr).await? else {
            continue;
        };
        if same_change(&remote, &local) {
            queue.mark_persisted(entry.sequence_nr)?;
            settled += 1;
        }
    }
    if settled > 0 {
        info!(settled, "Pending rows already on the remote");
    }
    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerfs_storage::{MemoryBlobStore, MemoryRemoteLog};
    use tempfile::TempDir;

    fn collaborators() -> Collaborators {
        Collaborators::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryRemoteLog::new()),
            DriveKey::generate(),
        )
    }

    fn config(temp: &TempDir) -> DriveConfig {
        DriveConfig::with_storage_dir(temp.path())
            .with_min_delay(Duration::from_millis(50))
            .with_drain_floor(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_mutations_are_visible_immediately() {
        let temp = TempDir::new().unwrap();
        let ctx = RootContext::open(
            RootId::new("ledger", "vol", "m"),
            config(&temp),
            &collaborators(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let dir = ctx
            .mutate(Mutation::CreateDirectory {
                parent: ItemId::ROOT,
                name: "docs".into(),
            })
            .unwrap();
        assert_eq!(dir.sequence_nr, 0);
        let file = ctx
            .write_file(dir.item, "a.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(ctx.resolve_path("/docs/a.txt"), Some(file));
        assert_eq!(ctx.read(file).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(ctx.list(dir.item).unwrap().len(), 1);
        assert_eq!(ctx.last_applied(), Some(2));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_item_rejects_mutations() {
        let temp = TempDir::new().unwrap();
        let ctx = RootContext::open(
            RootId::new("ledger", "vol", "m"),
            config(&temp),
            &collaborators(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let item = ctx
            .mutate(Mutation::CreateDirectory {
                parent: ItemId::ROOT,
                name: "x".into(),
            })
            .unwrap()
            .item;
        ctx.shared.failed.insert(item, "lost".into());

        let err = ctx
            .mutate(Mutation::Rename {
                item,
                new_name: "y".into(),
            })
            .unwrap_err();
        assert!(matches!(err, DriveError::PermanentConflict { .. }));

        assert_eq!(ctx.clear_failure(item).as_deref(), Some("lost"));
        ctx.mutate(Mutation::Rename {
            item,
            new_name: "y".into(),
        })
        .unwrap();
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_root() {
        let temp = TempDir::new().unwrap();
        let collaborators = collaborators();
        let root = RootId::new("ledger", "vol", "m");
        let ctx = RootContext::open(
            root.clone(),
            config(&temp),
            &collaborators,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        ctx.shutdown().await;
        ctx.shutdown().await;

        assert_eq!(ctx.status(), UploaderStatus::Stopped);
        let err = ctx
            .mutate(Mutation::CreateDirectory {
                parent: ItemId::ROOT,
                name: "late".into(),
            })
            .unwrap_err();
        assert!(matches!(err, DriveError::Unmounted(_)));
        assert!(matches!(ctx.pending(), Err(DriveError::Unmounted(_))));

        // The storage path is free while the old handle lives on
        let again = RootContext::open(root, config(&temp), &collaborators, CancellationToken::new())
            .await
            .unwrap();
        assert!(again.pending().unwrap().is_empty());
        again.shutdown().await;
        drop(ctx);
    }

    #[tokio::test]
    async fn test_halted_root_rejects_mutations() {
        let temp = TempDir::new().unwrap();
        let ctx = RootContext::open(
            RootId::new("ledger", "vol", "m"),
            config(&temp),
            &collaborators(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        ctx.shutdown().await;

        ctx.shared.set_status(UploaderStatus::Failed {
            reason: "key mismatch".into(),
        });
        let err = ctx
            .mutate(Mutation::CreateDirectory {
                parent: ItemId::ROOT,
                name: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(err, DriveError::ReplicationHalted(_)));
    }
}
