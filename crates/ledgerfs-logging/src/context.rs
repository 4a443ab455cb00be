//! Root context injection
//!
//! Thread-local storage for the drive root currently being worked on, so
//! spans created while a [`RootContextGuard`] is held carry the root key.

use std::cell::RefCell;

use ledgerfs_core::RootId;
use uuid::Uuid;

/// Root context data stored in thread-local storage
#[derive(Debug, Clone)]
pub struct RootContextData {
    /// The root's key (`schema/volume/mount_point`)
    pub root: String,
    /// Unique id of this mount of the root
    pub mount_id: Uuid,
}

thread_local! {
    static ROOT_CONTEXT: RefCell<Option<RootContextData>> = const { RefCell::new(None) };
}

/// RAII guard for root context
///
/// Sets the root context for the current thread and restores the previous
/// one when dropped. Not meant to be held across `.await`.
///
/// ```ignore
/// let _guard = RootContextGuard::new(&root, mount_id);
/// tracing::info!("Applying event"); // span context includes the root key
/// ```
pub struct RootContextGuard {
    previous: Option<RootContextData>,
}

impl RootContextGuard {
    /// Set the context to `root` for the current scope
    pub fn new(root: &RootId, mount_id: Uuid) -> Self {
        let previous = ROOT_CONTEXT.with(|ctx| ctx.borrow().clone());

        let new_ctx = RootContextData {
            root: root.key(),
            mount_id,
        };
        ROOT_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(new_ctx));

        Self { previous }
    }

    /// Get the current root context (if any)
    pub fn current() -> Option<RootContextData> {
        ROOT_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current root key (if set)
    pub fn current_root() -> Option<String> {
        Self::current().map(|ctx| ctx.root)
    }
}

impl Drop for RootContextGuard {
    fn drop(&mut self) {
        ROOT_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}
