//! # Ledgerfs Core
//!
//! Core types, the event model and collaborator boundaries for ledgerfs.
//!
//! A ledgerfs drive records every filesystem mutation as an event. Events are
//! queued locally, applied to an in-memory tree, and replicated to a remote,
//! content-addressed, append-only log. This crate holds the pieces every
//! other crate agrees on.
//!
//! ## Key Types
//!
//! - [`RootId`]: One logical mounted drive
//! - [`ItemId`]: Identity of a file or directory inside a root
//! - [`DriveEvent`]: Tagged union of mutation kinds, generic over how content is carried
//! - [`LocalEvent`] / [`NetworkEvent`]: Raw-content and locator-content encodings
//! - [`ContentLocator`]: Inline bytes or a pointer into blob storage
//!
//! ## Collaborator Traits
//!
//! - [`BlobStore`]: Content-addressed `put` / `get`
//! - [`RemoteLog`]: Append-only streams with expected-version preconditions

pub mod content;
pub mod error;
pub mod event;
pub mod ids;
pub mod traits;

pub use content::{BlobMap, ContentLocator, ContentRef};
pub use error::{CoreError, CoreResult};
pub use event::{DriveEvent, EventKind, LocalEvent, NetworkEvent};
pub use ids::{ItemId, RootId};
pub use traits::{AppendOutcome, BlobStore, ExpectedVersion, LogRecord, RemoteLog};
