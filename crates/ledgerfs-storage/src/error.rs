//! Storage errors

use ledgerfs_core::CoreError;
use thiserror::Error;

/// Errors raised by the local queue and the storage-backed collaborators
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    /// No blob or stream under this name
    #[error("Missing: {0}")]
    Missing(String),

    #[error("Object of {size} bytes exceeds the limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    /// A persisted record could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Stored bytes failed verification
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),

    /// The queue already holds a row with this sequence number
    #[error("Sequence {0} already queued")]
    DuplicateSequence(u64),

    /// A queue is already open against this storage path
    #[error("Storage path already in use: {0}")]
    SingleInstanceViolation(String),

    /// The queue was closed and released its storage path
    #[error("Queue closed: {0}")]
    Closed(String),
}

impl StorageError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Wrap any redb error
    pub fn database(err: impl ToString) -> Self {
        Self::Database(err.to_string())
    }

    pub fn too_large(size: usize, limit: u64) -> Self {
        Self::TooLarge {
            size: size as u64,
            limit,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

/// Storage failures as seen across the collaborator boundary
///
/// Local I/O and database trouble may clear up, so it maps to
/// `Unavailable`. Everything else is permanent.
impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(msg) | StorageError::Database(msg) => CoreError::Unavailable(msg),
            StorageError::Missing(msg) => CoreError::NotFound(msg),
            StorageError::Encoding(msg) => CoreError::Serialization(msg),
            StorageError::Corrupt(msg) => CoreError::Corrupt(msg),
            other @ (StorageError::TooLarge { .. }
            | StorageError::DuplicateSequence(_)
            | StorageError::SingleInstanceViolation(_)
            | StorageError::Closed(_)) => CoreError::Rejected(other.to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_core_error() {
        let core: CoreError = StorageError::Io("disk gone".into()).into();
        assert!(core.is_transient());

        let core: CoreError = StorageError::Corrupt("hash".into()).into();
        assert!(matches!(core, CoreError::Corrupt(_)));

        let core: CoreError = StorageError::too_large(10, 4).into();
        assert!(matches!(core, CoreError::Rejected(ref msg) if msg.contains("limit of 4")));
    }

    #[test]
    fn test_duplicate_sequence_message() {
        let err = StorageError::DuplicateSequence(7);
        assert_eq!(err.to_string(), "Sequence 7 already queued");
    }
}
