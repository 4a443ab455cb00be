//! Remote event stream of a root
//!
//! Position `v` of the stream holds the sealed network event numbered `v`.
//! Uploads append with an expected-version precondition so that two writers
//! can never both claim the same number.

use std::collections::VecDeque;
use std::sync::Arc;

use ledgerfs_core::{AppendOutcome, ExpectedVersion, LocalEvent, LogRecord, NetworkEvent, RemoteLog};
use ledgerfs_storage::WalEntry;
use tracing::{debug, instrument, warn};

use crate::codec::EventCodec;
use crate::error::{DriveError, DriveResult};
use crate::indirection::ContentIndirection;

/// How an append attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stored at `version`
    Success { version: u64 },
    /// Another event already holds the number; the stream ends at `current`
    VersionConflict { current: Option<u64> },
}

/// The event as sent and what the remote made of it
#[derive(Debug, Clone)]
pub struct Upload {
    pub event: NetworkEvent,
    pub outcome: UploadOutcome,
}

/// Uploads and downloads the events of one root
#[derive(Clone)]
pub struct NetworkEventService {
    log: Arc<dyn RemoteLog>,
    indirection: ContentIndirection,
    codec: EventCodec,
    stream: String,
    page_size: usize,
}

impl NetworkEventService {
    pub fn new(
        log: Arc<dyn RemoteLog>,
        indirection: ContentIndirection,
        codec: EventCodec,
        stream: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            log,
            indirection,
            codec,
            stream: stream.into(),
            page_size: page_size.max(1),
        }
    }

    /// Name of the remote stream
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Upload one queued entry
    ///
    /// The entry is opened, large content is moved out through the
    /// indirection layer, and the event is appended expecting the stream to
    /// end at `sequence_nr - 1`. Remote failures are returned as errors.
    #[instrument(skip(self, entry), fields(stream = %self.stream, seq = entry.sequence_nr))]
    pub async fn upload(&self, entry: &WalEntry) -> DriveResult<Upload> {
        let local: LocalEvent = self.codec.open(&entry.encrypted_payload)?;
        if local.sequence_nr() != entry.sequence_nr {
            return Err(DriveError::SequenceGap {
                expected: entry.sequence_nr,
                got: local.sequence_nr(),
            });
        }

        let event = self.to_network(local).await?;
        let sealed = self.codec.seal(&event)?;
        let expected = ExpectedVersion::for_sequence(entry.sequence_nr);

        let outcome = match self.log.append(&self.stream, expected, sealed).await? {
            AppendOutcome::Success { version } => {
                debug!(version, kind = %event.kind(), "Event uploaded");
                UploadOutcome::Success { version }
            }
            AppendOutcome::VersionConflict { current } => {
                warn!(?current, "Remote stream moved ahead");
                UploadOutcome::VersionConflict { current }
            }
        };
        Ok(Upload { event, outcome })
    }

    /// Swap raw content for locators
    pub async fn to_network(&self, local: LocalEvent) -> DriveResult<NetworkEvent> {
        let indirection = &self.indirection;
        local
            .map_content_async(|content| indirection.locate(content))
            .await
    }

    /// Stream events recorded after `after` (from the start when `None`)
    pub fn load(&self, after: Option<u64>) -> EventStream {
        EventStream {
            service: self.clone(),
            cursor: after,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The event at one position, if the stream reaches it
    pub async fn event_at(&self, sequence_nr: u64) -> DriveResult<Option<NetworkEvent>> {
        let records = self
            .log
            .read(&self.stream, sequence_nr.checked_sub(1), 1)
            .await?;
        match records.into_iter().next() {
            Some(record) if record.version == sequence_nr => Ok(Some(self.decode(&record)?)),
            _ => Ok(None),
        }
    }

    /// Last position of the stream
    pub async fn last_version(&self) -> DriveResult<Option<u64>> {
        Ok(self.log.last_version(&self.stream).await?)
    }

    fn decode(&self, record: &LogRecord) -> DriveResult<NetworkEvent> {
        let event: NetworkEvent = self.codec.open(&record.data)?;
        if event.sequence_nr() != record.version {
            return Err(DriveError::SequenceGap {
                expected: record.version,
                got: event.sequence_nr(),
            });
        }
        Ok(event)
    }
}

/// Cursor over a remote event stream
///
/// Reads page by page and ends at the end of the stream as of the last page
/// read. It cannot be rewound; call [`NetworkEventService::load`] again to
/// start over.
pub struct EventStream {
    service: NetworkEventService,
    cursor: Option<u64>,
    buffer: VecDeque<LogRecord>,
    exhausted: bool,
}

impl EventStream {
    /// The next event, or `None` at the end of the stream
    pub async fn next(&mut self) -> DriveResult<Option<NetworkEvent>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page_size = self.service.page_size;
            let page = self
                .service
                .log
                .read(&self.service.stream, self.cursor, page_size)
                .await?;
            self.exhausted = page.len() < page_size;
            self.buffer.extend(page);
        }

        let Some(record) = self.buffer.pop_front() else {
            return Ok(None);
        };
        let event = self.service.decode(&record)?;
        self.cursor = Some(record.version);
        Ok(Some(event))
    }

    /// Position of the last event returned
    pub fn position(&self) -> Option<u64> {
        self.cursor
    }

    /// Read the rest of the stream
    pub async fn collect(mut self) -> DriveResult<Vec<NetworkEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ledgerfs_core::{CoreError, ItemId};
    use ledgerfs_crypto::DriveKey;
    use ledgerfs_storage::{Fault, MemoryBlobStore, MemoryRemoteLog};

    fn service(page_size: usize) -> (NetworkEventService, EventCodec, Arc<MemoryRemoteLog>) {
        let codec = EventCodec::new(DriveKey::generate());
        let log = Arc::new(MemoryRemoteLog::new());
        let indirection = ContentIndirection::new(
            Arc::new(MemoryBlobStore::new()),
            codec.clone(),
            100,
            64,
        );
        let service = NetworkEventService::new(
            log.clone(),
            indirection,
            codec.clone(),
            "ledger/vol/mnt",
            page_size,
        );
        (service, codec, log)
    }

    fn entry(codec: &EventCodec, event: &LocalEvent) -> WalEntry {
        WalEntry::pending(event.sequence_nr(), codec.seal(event).unwrap())
    }

    fn mkdir(seq: u64) -> LocalEvent {
        LocalEvent::DirectoryItemCreated {
            sequence_nr: seq,
            item_id: ItemId::generate(),
            parent_id: ItemId::ROOT,
            name: format!("dir-{}", seq),
        }
    }

    #[tokio::test]
    async fn test_upload_in_order() {
        let (service, codec, log) = service(16);
        for seq in 0..3 {
            let upload = service.upload(&entry(&codec, &mkdir(seq))).await.unwrap();
            assert_eq!(upload.outcome, UploadOutcome::Success { version: seq });
        }
        assert_eq!(log.stream_len("ledger/vol/mnt"), 3);
    }

    #[tokio::test]
    async fn test_upload_conflict() {
        let (service, codec, _log) = service(16);
        service.upload(&entry(&codec, &mkdir(0))).await.unwrap();

        let again = service.upload(&entry(&codec, &mkdir(0))).await.unwrap();
        assert_eq!(
            again.outcome,
            UploadOutcome::VersionConflict { current: Some(0) }
        );
    }

    #[tokio::test]
    async fn test_large_content_goes_indirect() {
        let (service, codec, _log) = service(16);
        let event = LocalEvent::FileItemCreated {
            sequence_nr: 0,
            item_id: ItemId::generate(),
            parent_id: ItemId::ROOT,
            name: "big".into(),
            content: Bytes::from(vec![9u8; 1000]),
        };
        let upload = service.upload(&entry(&codec, &event)).await.unwrap();
        let locator = upload.event.content().unwrap();
        assert!(locator.is_indirect);
        assert_eq!(locator.size, 1000);

        let fetched = service.event_at(0).await.unwrap().unwrap();
        assert_eq!(fetched, upload.event);
    }

    #[tokio::test]
    async fn test_stream_pages_through_everything() {
        let (service, codec, _log) = service(2);
        for seq in 0..5 {
            service.upload(&entry(&codec, &mkdir(seq))).await.unwrap();
        }

        let all = service.load(None).collect().await.unwrap();
        let seqs: Vec<u64> = all.iter().map(|e| e.sequence_nr()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);

        let mut tail = service.load(Some(2));
        assert_eq!(tail.next().await.unwrap().unwrap().sequence_nr(), 3);
        assert_eq!(tail.position(), Some(3));
        assert_eq!(tail.next().await.unwrap().unwrap().sequence_nr(), 4);
        assert!(tail.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_misnumbered_record_is_a_gap() {
        let (service, codec, log) = service(16);
        let misnumbered = NetworkEvent::DirectoryItemCreated {
            sequence_nr: 7,
            item_id: ItemId::generate(),
            parent_id: ItemId::ROOT,
            name: "late".into(),
        };
        let sealed = codec.seal(&misnumbered).unwrap();
        log.append("ledger/vol/mnt", ExpectedVersion::Any, sealed)
            .await
            .unwrap();

        let err = service.load(None).collect().await.unwrap_err();
        assert!(matches!(err, DriveError::SequenceGap { expected: 0, got: 7 }));
    }

    #[tokio::test]
    async fn test_unavailable_is_an_error() {
        let (service, codec, log) = service(16);
        log.set_fault(Some(Fault::Unavailable));
        let err = service.upload(&entry(&codec, &mkdir(0))).await.unwrap_err();
        assert!(matches!(err, DriveError::Remote(CoreError::Unavailable(_))));
        assert!(err.is_transient());
    }
}
