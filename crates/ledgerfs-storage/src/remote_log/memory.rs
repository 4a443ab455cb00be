//! In-memory remote log

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use ledgerfs_core::{AppendOutcome, CoreResult, ExpectedVersion, LogRecord, RemoteLog};
use parking_lot::Mutex;
use tracing::debug;

use super::{last_version, page};
use crate::fault::{Fault, FaultSwitch};

/// Remote log held in process memory
///
/// Shared between several drives (wrapped in an `Arc`) it stands in for a
/// multi-writer remote.
#[derive(Debug, Default)]
pub struct MemoryRemoteLog {
    streams: Mutex<HashMap<String, Vec<Bytes>>>,
    fault: FaultSwitch,
}

impl MemoryRemoteLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `fault` (or stop failing)
    pub fn set_fault(&self, fault: Option<Fault>) {
        self.fault.set(fault);
    }

    /// Number of records in `stream`
    pub fn stream_len(&self, stream: &str) -> usize {
        self.streams.lock().get(stream).map_or(0, Vec::len)
    }
}

#[async_trait]
impl RemoteLog for MemoryRemoteLog {
    async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        data: Bytes,
    ) -> CoreResult<AppendOutcome> {
        self.fault.check("append")?;
        let mut streams = self.streams.lock();
        let records = streams.entry(stream.to_string()).or_default();
        let current = last_version(records);
        if !expected.is_satisfied_by(current) {
            debug!(stream, ?expected, ?current, "Append precondition failed");
            return Ok(AppendOutcome::VersionConflict { current });
        }
        records.push(data);
        Ok(AppendOutcome::Success {
            version: records.len() as u64 - 1,
        })
    }

    async fn read(
        &self,
        stream: &str,
        after: Option<u64>,
        max: usize,
    ) -> CoreResult<Vec<LogRecord>> {
        self.fault.check("read")?;
        let streams = self.streams.lock();
        Ok(streams
            .get(stream)
            .map(|records| page(records, after, max))
            .unwrap_or_default())
    }

    async fn last_version(&self, stream: &str) -> CoreResult<Option<u64>> {
        self.fault.check("read")?;
        Ok(self
            .streams
            .lock()
            .get(stream)
            .and_then(|records| last_version(records)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_with_preconditions() {
        let log = MemoryRemoteLog::new();
        let s = "ledger/vol/mnt";

        assert_eq!(
            log.append(s, ExpectedVersion::NoStream, Bytes::from_static(b"a"))
                .await
                .unwrap(),
            AppendOutcome::Success { version: 0 }
        );
        assert_eq!(
            log.append(s, ExpectedVersion::NoStream, Bytes::from_static(b"b"))
                .await
                .unwrap(),
            AppendOutcome::VersionConflict { current: Some(0) }
        );
        assert_eq!(
            log.append(s, ExpectedVersion::Exact(0), Bytes::from_static(b"b"))
                .await
                .unwrap(),
            AppendOutcome::Success { version: 1 }
        );
        assert_eq!(log.last_version(s).await.unwrap(), Some(1));
        assert_eq!(log.last_version("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_pages() {
        let log = MemoryRemoteLog::new();
        for i in 0..5u8 {
            log.append("s", ExpectedVersion::Any, Bytes::from(vec![i]))
                .await
                .unwrap();
        }

        let first = log.read("s", None, 2).await.unwrap();
        assert_eq!(first.iter().map(|r| r.version).collect::<Vec<_>>(), vec![0, 1]);

        let rest = log.read("s", Some(1), 10).await.unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].version, 2);
        assert_eq!(&rest[0].data[..], &[2]);

        assert!(log.read("s", Some(4), 10).await.unwrap().is_empty());
        assert!(log.read("missing", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fault_is_an_error_not_a_conflict() {
        let log = MemoryRemoteLog::new();
        log.set_fault(Some(Fault::Unavailable));
        let err = log
            .append("s", ExpectedVersion::Any, Bytes::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(log.stream_len("s"), 0);
    }
}
