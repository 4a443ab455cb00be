//! # Ledgerfs Storage
//!
//! Local durability and reference storage collaborators for ledgerfs.
//!
//! ## Components
//!
//! - [`DurableQueue`]: redb-backed write-ahead queue of pending mutations,
//!   one per root, with an atomic enqueue-and-apply transaction and a
//!   single-instance guard per storage path
//! - [`FsBlobStore`] / [`MemoryBlobStore`]: content-addressed blob stores
//! - [`FileRemoteLog`] / [`MemoryRemoteLog`]: append-only versioned streams
//!
//! The memory collaborators accept injected faults ([`Fault`]) so callers can
//! exercise outage and authorization paths.

pub mod blobs;
pub mod error;
pub mod fault;
pub mod queue;
pub mod remote_log;

pub use blobs::{FsBlobStore, FsBlobStoreConfig, MemoryBlobStore};
pub use error::{StorageError, StorageResult};
pub use fault::{Fault, FaultSwitch};
pub use queue::{DurableQueue, QueueConfig, WalEntry};
pub use remote_log::{FileRemoteLog, FileRemoteLogConfig, MemoryRemoteLog};
