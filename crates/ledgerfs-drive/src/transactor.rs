//! Local transactions: seal, enqueue and apply as one step

use std::sync::Arc;

use ledgerfs_core::{ItemId, LocalEvent};
use ledgerfs_storage::{DurableQueue, WalEntry};
use tracing::{debug, warn};

use crate::codec::EventCodec;
use crate::error::{DriveError, DriveResult};
use crate::state::MaterializedState;

/// Runs mutations against the queue and the state together
#[derive(Clone)]
pub struct EventTransactor {
    queue: Arc<DurableQueue>,
    codec: EventCodec,
}

impl EventTransactor {
    pub fn new(queue: Arc<DurableQueue>, codec: EventCodec) -> Self {
        Self { queue, codec }
    }

    /// Seal `event`, queue it and apply it to `state`
    ///
    /// Either both the queue row and the state change survive or neither
    /// does. The caller holds the root's lock for the duration, which is
    /// what `&mut state` expresses.
    pub fn transact(
        &self,
        state: &mut MaterializedState,
        event: &LocalEvent,
    ) -> DriveResult<ItemId> {
        let seq = event.sequence_nr();
        let entry = WalEntry::pending(seq, self.codec.seal(event)?);

        let mut undo = None;
        let result = self.queue.enqueue_and_apply(&entry, || {
            let (item, applied) = state.apply_journaled(event)?;
            undo = Some(applied);
            Ok::<_, DriveError>(item)
        });

        match result {
            Ok(item) => {
                debug!(seq, kind = %event.kind(), item = %item, "Mutation committed");
                Ok(item)
            }
            Err(e) => {
                // The apply ran but the commit did not
                if let Some(applied) = undo {
                    warn!(seq, error = %e, "Commit failed after apply, rolling back state");
                    state.rollback(applied);
                }
                Err(e)
            }
        }
    }
}
