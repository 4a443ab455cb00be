//! Collaborator traits
//!
//! The replication core talks to two remote services: a content-addressed
//! blob store and an append-only event log. Both sit behind these traits so
//! that file-backed, in-memory and networked implementations are
//! interchangeable.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::content::ContentRef;
use crate::error::CoreResult;

/// Content-addressed blob storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data`, returning its content reference
    ///
    /// Storing the same bytes twice yields the same reference.
    async fn put(&self, data: &[u8]) -> CoreResult<ContentRef>;

    /// Load the blob named by `content_ref`
    ///
    /// Implementations must verify the content against the reference and
    /// return [`CoreError::Corrupt`](crate::CoreError::Corrupt) on mismatch.
    async fn get(&self, content_ref: &ContentRef) -> CoreResult<Bytes>;
}

/// Optimistic-concurrency precondition for [`RemoteLog::append`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// The stream must be empty
    NoStream,
    /// The last record in the stream must be at this version
    Exact(u64),
    /// No precondition
    Any,
}

impl ExpectedVersion {
    /// Precondition for appending the event numbered `sequence_nr`
    pub fn for_sequence(sequence_nr: u64) -> Self {
        match sequence_nr.checked_sub(1) {
            Some(previous) => ExpectedVersion::Exact(previous),
            None => ExpectedVersion::NoStream,
        }
    }

    /// Whether a stream whose last version is `current` satisfies this
    pub fn is_satisfied_by(&self, current: Option<u64>) -> bool {
        match self {
            ExpectedVersion::NoStream => current.is_none(),
            ExpectedVersion::Exact(v) => current == Some(*v),
            ExpectedVersion::Any => true,
        }
    }
}

/// Result of an append that reached the remote log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Record stored at `version`
    Success { version: u64 },
    /// Precondition failed; `current` is the stream's last version
    VersionConflict { current: Option<u64> },
}

/// One record read back from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Zero-based position in the stream
    pub version: u64,
    /// Opaque record bytes
    pub data: Bytes,
}

/// Append-only, versioned record streams
#[async_trait]
pub trait RemoteLog: Send + Sync {
    /// Append `data` to `stream` if `expected` holds
    ///
    /// A failed precondition is reported as
    /// [`AppendOutcome::VersionConflict`], not as an error.
    async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        data: Bytes,
    ) -> CoreResult<AppendOutcome>;

    /// Read up to `max` records with version strictly greater than `after`
    ///
    /// `after = None` reads from the start of the stream. A missing stream
    /// reads as empty.
    async fn read(&self, stream: &str, after: Option<u64>, max: usize)
    -> CoreResult<Vec<LogRecord>>;

    /// Version of the last record in `stream`, if any
    async fn last_version(&self, stream: &str) -> CoreResult<Option<u64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_version_for_sequence() {
        assert_eq!(ExpectedVersion::for_sequence(0), ExpectedVersion::NoStream);
        assert_eq!(ExpectedVersion::for_sequence(5), ExpectedVersion::Exact(4));
    }

    #[test]
    fn test_expected_version_satisfaction() {
        assert!(ExpectedVersion::NoStream.is_satisfied_by(None));
        assert!(!ExpectedVersion::NoStream.is_satisfied_by(Some(0)));
        assert!(ExpectedVersion::Exact(3).is_satisfied_by(Some(3)));
        assert!(!ExpectedVersion::Exact(3).is_satisfied_by(Some(4)));
        assert!(!ExpectedVersion::Exact(0).is_satisfied_by(None));
        assert!(ExpectedVersion::Any.is_satisfied_by(None));
        assert!(ExpectedVersion::Any.is_satisfied_by(Some(12)));
    }
}
