//! Error types for the drive

use ledgerfs_core::{CoreError, ItemId};
use ledgerfs_crypto::CryptoError;
use ledgerfs_storage::StorageError;
use thiserror::Error;

use crate::tree::TreeError;

/// Errors raised by drive operations and the uploader
#[derive(Debug, Error)]
pub enum DriveError {
    /// An event's sequence number does not follow the last applied one
    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    /// The local queue transaction failed
    #[error("Local transaction failed: {0}")]
    LocalTransaction(String),

    /// The remote stream moved past the expected version
    #[error("Version conflict at sequence {sequence_nr} (remote at {current:?})")]
    VersionConflict {
        sequence_nr: u64,
        current: Option<u64>,
    },

    /// A local change cannot be reconciled with the remote history
    #[error("Permanent conflict on {item}: {reason}")]
    PermanentConflict { item: ItemId, reason: String },

    /// Writing a file's content failed after the file was created
    #[error("Content write failed for {item} (retained: {retained}): {reason}")]
    ContentWrite {
        item: ItemId,
        retained: bool,
        reason: String,
    },

    /// Another queue already owns this root's storage
    #[error("Root already open: {0}")]
    SingleInstanceViolation(String),

    /// The mutation does not fit the current tree
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Sealing or opening a payload failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The caller may not write to the remote
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Blob storage or the remote log failed
    #[error("Remote error: {0}")]
    Remote(CoreError),

    /// Encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The root's uploader stopped on a fatal error
    #[error("Replication halted: {0}")]
    ReplicationHalted(String),

    /// The root was unmounted through this handle
    #[error("Root unmounted: {0}")]
    Unmounted(String),
}

impl DriveError {
    /// Whether the uploader should retry after a delay
    ///
    /// Authorization failures count: access may be granted later, and the
    /// queued rows must survive until it is.
    pub fn is_transient(&self) -> bool {
        match self {
            DriveError::Remote(e) => e.is_transient(),
            DriveError::VersionConflict { .. } | DriveError::Unauthorized(_) => true,
            _ => false,
        }
    }

    /// Whether the failure is an authorization failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DriveError::Unauthorized(_))
    }
}

impl From<CoreError> for DriveError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Unauthorized(msg) => DriveError::Unauthorized(msg),
            other => DriveError::Remote(other),
        }
    }
}

impl From<StorageError> for DriveError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::SingleInstanceViolation(path) => {
                DriveError::SingleInstanceViolation(path)
            }
            StorageError::Closed(path) => DriveError::Unmounted(path),
            other => DriveError::LocalTransaction(other.to_string()),
        }
    }
}

impl From<postcard::Error> for DriveError {
    fn from(e: postcard::Error) -> Self {
        DriveError::Serialization(e.to_string())
    }
}

/// Result type alias for drive operations
pub type DriveResult<T> = Result<T, DriveError>;
