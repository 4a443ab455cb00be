//! # Ledgerfs Drive
//!
//! Event-sourced virtual drive. Every change to a root's directory tree is
//! an event with a contiguous sequence number. Events are applied locally
//! and written to a durable queue in one transaction, then replicated to an
//! append-only remote stream by a background uploader.
//!
//! This crate provides:
//! - [`Drive`]: registry of mounted roots
//! - [`RootContext`]: mutations, reads and replication status of one root
//! - [`MaterializedState`] / [`FileTree`]: the tree rebuilt from events
//! - [`SnapshotManager`]: snapshots and restore
//!
//! ## Example
//!
//! ```rust,ignore
//! use ledgerfs_drive::{Collaborators, Drive, DriveConfig, Mutation};
//!
//! let drive = Drive::new(DriveConfig::with_storage_dir("./data"), collaborators);
//! let root = drive.require(&RootId::new("ledger", "vol", "home")).await?;
//!
//! let docs = root.mutate(Mutation::CreateDirectory {
//!     parent: ItemId::ROOT,
//!     name: "docs".into(),
//! })?;
//! let file = root.write_file(docs.item, "notes.txt", Bytes::from("hi")).await?;
//! assert_eq!(root.read(file).await?, "hi");
//!
//! drive.shutdown().await;
//! ```

pub mod codec;
mod config;
pub mod conflict;
mod drive;
mod error;
pub mod indirection;
mod mutation;
pub mod network;
mod root;
pub mod sequence;
pub mod snapshot;
pub mod state;
pub mod transactor;
pub mod tree;
pub mod uploader;

pub use codec::EventCodec;
pub use config::DriveConfig;
pub use conflict::{ConflictResolver, Resolution};
pub use drive::Drive;
pub use error::{DriveError, DriveResult};
pub use indirection::ContentIndirection;
pub use mutation::{Mutation, MutationReceipt};
pub use network::{EventStream, NetworkEventService, Upload, UploadOutcome};
pub use root::{Collaborators, RootContext};
pub use snapshot::{Snapshot, SnapshotManager};
pub use state::{ItemDescriptor, MaterializedState};
pub use tree::{FileContent, FileTree, TreeError, TreeNode};
pub use uploader::{AdaptiveDelay, UploaderStatus};
