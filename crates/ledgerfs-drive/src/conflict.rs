//! Conflict resolution
//!
//! An upload conflicts when another writer already holds the sequence number
//! the entry was queued under. The resolver fetches the remote events this
//! root has not confirmed yet and rebases every pending entry onto them:
//! the confirmed state is advanced by the fetched events, then each pending
//! event is renumbered and re-applied on top. Entries that no longer apply
//! are dropped and recorded as failed.
//!
//! Concurrent content edits are never merged. If the conflicting entry sets
//! or clears content of a file the remote also changed or removed, it fails
//! permanently even if it would still apply.

use bytes::Bytes;
use ledgerfs_core::{DriveEvent, EventKind, ItemId, LocalEvent, NetworkEvent};
use ledgerfs_storage::WalEntry;
use tracing::{info, instrument, warn};

use crate::codec::EventCodec;
use crate::error::{DriveError, DriveResult};
use crate::network::NetworkEventService;
use crate::root::{RebaseBase, RootShared};
use crate::state::MaterializedState;

/// How a conflicting entry was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Rebased; upload again under the new number
    Retried { sequence_nr: u64 },
    /// The remote already holds this exact change
    AlreadyPersisted,
    /// The change was dropped
    Permanent { item: ItemId, reason: String },
}

/// A pending entry that could not be kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEntry {
    pub sequence_nr: u64,
    pub item: ItemId,
    pub reason: String,
}

/// Pending entries replayed onto a new confirmed state
#[derive(Debug)]
pub struct RebasePlan {
    pub confirmed: MaterializedState,
    pub live: MaterializedState,
    /// Rows replacing every pending row of the queue
    pub entries: Vec<WalEntry>,
    /// Old and new number of each kept entry
    pub renumbered: Vec<(u64, u64)>,
    pub dropped: Vec<DroppedEntry>,
}

impl RebasePlan {
    /// Replay `pending` on top of `confirmed`
    ///
    /// `doomed` names an entry to drop regardless, with the reason.
    pub fn build(
        codec: &EventCodec,
        confirmed: MaterializedState,
        pending: &[WalEntry],
        doomed: Option<(u64, String)>,
    ) -> DriveResult<Self> {
        let mut live = confirmed.clone();
        let mut entries = Vec::with_capacity(pending.len());
        let mut renumbered = Vec::with_capacity(pending.len());
        let mut dropped = Vec::new();

        for entry in pending {
            let event: LocalEvent = codec.open(&entry.encrypted_payload)?;

            if let Some((seq, reason)) = &doomed
                && *seq == entry.sequence_nr
            {
                dropped.push(DroppedEntry {
                    sequence_nr: entry.sequence_nr,
                    item: event.target_item(),
                    reason: reason.clone(),
                });
                continue;
            }

            let new_seq = live.next_sequence();
            let event = event.with_sequence_nr(new_seq);
            match live.apply(&event) {
                Ok(_) => {
                    entries.push(WalEntry::pending(new_seq, codec.seal(&event)?));
                    renumbered.push((entry.sequence_nr, new_seq));
                }
                Err(e) => dropped.push(DroppedEntry {
                    sequence_nr: entry.sequence_nr,
                    item: event.target_item(),
                    reason: e.to_string(),
                }),
            }
        }

        Ok(Self {
            confirmed,
            live,
            entries,
            renumbered,
            dropped,
        })
    }
}

/// Outcome of applying a plan, without the states
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebaseReport {
    pub renumbered: Vec<(u64, u64)>,
    pub dropped: Vec<DroppedEntry>,
}

impl RebaseReport {
    /// Settle the fate of entry `seq`
    pub fn resolution_for(&self, seq: u64) -> DriveResult<Resolution> {
        if let Some(dropped) = self.dropped.iter().find(|d| d.sequence_nr == seq) {
            return Ok(Resolution::Permanent {
                item: dropped.item,
                reason: dropped.reason.clone(),
            });
        }
        self.renumbered
            .iter()
            .find(|(from, _)| *from == seq)
            .map(|(_, to)| Resolution::Retried { sequence_nr: *to })
            .ok_or_else(|| {
                DriveError::LocalTransaction(format!("entry {} vanished during rebase", seq))
            })
    }
}

/// Compare a remote event with a queued one, content by hash
pub fn same_change(remote: &NetworkEvent, local: &LocalEvent) -> bool {
    let remote = remote.clone().map_content(|locator| locator.content_id);
    let local = local
        .clone()
        .map_content(|content: Bytes| *blake3::hash(&content).as_bytes());
    remote == local
}

/// Why `local` must not be replayed after `fetched`, if it must not
pub fn content_overlap(local: &LocalEvent, fetched: &[NetworkEvent]) -> Option<String> {
    if !matches!(
        local.kind(),
        EventKind::FileContentSet | EventKind::FileContentCleared
    ) {
        return None;
    }
    let file = local.target_item();
    fetched
        .iter()
        .find(|remote| {
            remote.target_item() == file
                && matches!(
                    remote,
                    DriveEvent::FileContentSet { .. }
                        | DriveEvent::FileContentCleared { .. }
                        | DriveEvent::ItemRemoved { .. }
                )
        })
        .map(|remote| {
            format!(
                "concurrent {} on {} at sequence {}",
                remote.kind(),
                file,
                remote.sequence_nr()
            )
        })
}

/// Settles version conflicts of one root
#[derive(Clone)]
pub struct ConflictResolver {
    network: NetworkEventService,
    codec: EventCodec,
}

impl ConflictResolver {
    pub fn new(network: NetworkEventService, codec: EventCodec) -> Self {
        Self { network, codec }
    }

    /// Resolve the conflict `entry` ran into
    #[instrument(skip_all, fields(seq = entry.sequence_nr))]
    pub(crate) async fn resolve(
        &self,
        root: &RootShared,
        entry: &WalEntry,
    ) -> DriveResult<Resolution> {
        let local: LocalEvent = self.codec.open(&entry.encrypted_payload)?;
        let fetched = self.network.load(root.confirmed_last()).collect().await?;

        if let Some(first) = fetched.first()
            && first.sequence_nr() == entry.sequence_nr
            && same_change(first, &local)
        {
            info!("Remote already holds this entry");
            return Ok(Resolution::AlreadyPersisted);
        }

        if fetched.is_empty() {
            warn!("Remote stream is behind the confirmed state, resynchronizing");
            return root
                .resync(None)
                .await?
                .resolution_for(entry.sequence_nr);
        }

        let doomed = content_overlap(&local, &fetched).map(|reason| (entry.sequence_nr, reason));
        let fetched_count = fetched.len();
        let report = match root.rebase(RebaseBase::Advance(fetched), doomed.clone()) {
            Ok(report) => report,
            Err(DriveError::SequenceGap { expected, got }) => {
                warn!(expected, got, "Fetched events do not follow confirmed state, resynchronizing");
                root.resync(doomed).await?
            }
            Err(e) => return Err(e),
        };

        info!(fetched = fetched_count, "Rebased pending entries");
        report.resolution_for(entry.sequence_nr)
    }
}
