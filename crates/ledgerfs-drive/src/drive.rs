//! Registry of mounted roots
//!
//! Roots are mounted lazily on first use. Concurrent first uses of the same
//! root share one mount.

use std::sync::Arc;

use dashmap::DashMap;
use ledgerfs_core::RootId;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::DriveConfig;
use crate::error::DriveResult;
use crate::root::{Collaborators, RootContext};
use crate::snapshot::Snapshot;

type Slot = Arc<OnceCell<Arc<RootContext>>>;

/// Every root mounted by this process
pub struct Drive {
    config: DriveConfig,
    collaborators: Collaborators,
    roots: DashMap<RootId, Slot>,
    cancel: CancellationToken,
}

impl Drive {
    pub fn new(config: DriveConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            roots: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// The context of `root`, mounting it if needed
    pub async fn require(&self, root: &RootId) -> DriveResult<Arc<RootContext>> {
        let slot = self.roots.entry(root.clone()).or_default().clone();
        let ctx = slot
            .get_or_try_init(|| async {
                RootContext::open(
                    root.clone(),
                    self.config.clone(),
                    &self.collaborators,
                    self.cancel.child_token(),
                )
                .await
                .map(Arc::new)
            })
            .await?;
        Ok(ctx.clone())
    }

    /// The context of `root` if it is mounted
    pub fn get(&self, root: &RootId) -> Option<Arc<RootContext>> {
        self.roots.get(root).and_then(|slot| slot.get().cloned())
    }

    /// Mounted roots
    pub fn roots(&self) -> Vec<RootId> {
        self.roots
            .iter()
            .filter(|slot| slot.value().initialized())
            .map(|slot| slot.key().clone())
            .collect()
    }

    /// Publish a snapshot of `root`
    pub async fn snapshot(&self, root: &RootId) -> DriveResult<Option<Snapshot>> {
        self.require(root).await?.snapshot().await
    }

    /// Stop the uploader of `root`, release its storage and forget it
    ///
    /// Handles obtained earlier stay valid but reject mutations.
    #[instrument(skip(self), fields(root = %root))]
    pub async fn unmount(&self, root: &RootId) -> bool {
        let Some((_, slot)) = self.roots.remove(root) else {
            return false;
        };
        match slot.get() {
            Some(ctx) => {
                ctx.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop every root
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let roots: Vec<RootId> = self.roots.iter().map(|slot| slot.key().clone()).collect();
        for root in &roots {
            self.unmount(root).await;
        }
        info!(count = roots.len(), "Drive shut down");
    }
}
