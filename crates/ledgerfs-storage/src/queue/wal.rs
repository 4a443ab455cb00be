//! redb-backed write-ahead queue

use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use redb::{Database, DatabaseError, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::guard::QueueGuard;
use crate::error::StorageError;

// Key: sequence_nr, Value: postcard WalRecord
const WAL: TableDefinition<u64, &[u8]> = TableDefinition::new("wal");

/// Configuration for a durable queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/wal.redb"),
            cache_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl QueueConfig {
    /// Queue stored at `db_path`
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }

    /// Queue for the root whose file stem is `file_stem`
    pub fn for_root(storage_dir: &Path, file_stem: &str) -> Self {
        Self::new(storage_dir.join(format!("{}.redb", file_stem)))
    }

    /// Set the redb cache size
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }
}

/// One queued mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Sequence number of the sealed event
    pub sequence_nr: u64,
    /// `nonce || ciphertext` of the serialized event
    pub encrypted_payload: Bytes,
    /// Whether the remote log has confirmed this entry
    pub persisted: bool,
}

impl WalEntry {
    /// A freshly accepted, not yet uploaded entry
    pub fn pending(sequence_nr: u64, encrypted_payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_nr,
            encrypted_payload: encrypted_payload.into(),
            persisted: false,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WalRecord {
    encrypted_payload: Vec<u8>,
    persisted: bool,
}

fn encode_record(entry: &WalEntry) -> Result<Vec<u8>, StorageError> {
    postcard::to_allocvec(&WalRecord {
        encrypted_payload: entry.encrypted_payload.to_vec(),
        persisted: entry.persisted,
    })
    .map_err(|e| StorageError::Encoding(e.to_string()))
}

fn decode_record(sequence_nr: u64, bytes: &[u8]) -> Result<WalEntry, StorageError> {
    let record: WalRecord = postcard::from_bytes(bytes)?;
    Ok(WalEntry {
        sequence_nr,
        encrypted_payload: Bytes::from(record.encrypted_payload),
        persisted: record.persisted,
    })
}

struct OpenDb {
    db: Database,
    // Dropped after `db` so the file is closed before the path is released.
    _guard: QueueGuard,
}

/// The local pending-mutation store of one root
///
/// Holds the storage path's [`QueueGuard`] until it is closed or dropped,
/// so at most one queue per path is open in the process; redb's own file
/// lock extends that to other processes.
pub struct DurableQueue {
    open: RwLock<Option<OpenDb>>,
    config: QueueConfig,
    last_touch: Mutex<Option<Instant>>,
    enqueued: Notify,
}

impl DurableQueue {
    /// Open or create the queue
    ///
    /// Fails with [`StorageError::SingleInstanceViolation`] if the path is
    /// already owned by another queue.
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: QueueConfig) -> Result<Self, StorageError> {
        let guard = QueueGuard::acquire(&config.db_path)?;

        let db = Database::builder()
            .set_cache_size(config.cache_size)
            .create(guard.path())
            .map_err(|e| match e {
                DatabaseError::DatabaseAlreadyOpen => {
                    StorageError::SingleInstanceViolation(guard.path().display().to_string())
                }
                other => StorageError::database(other),
            })?;

        let write_txn = db.begin_write().map_err(StorageError::database)?;
        write_txn.open_table(WAL).map_err(StorageError::database)?;
        write_txn.commit().map_err(StorageError::database)?;

        let queue = Self {
            open: RwLock::new(Some(OpenDb { db, _guard: guard })),
            config,
            last_touch: Mutex::new(None),
            enqueued: Notify::new(),
        };

        let pending = queue.pending_entries()?.len();
        info!(pending, "Opened durable queue");
        Ok(queue)
    }

    /// Get the configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn db(&self) -> Result<MappedRwLockReadGuard<'_, Database>, StorageError> {
        RwLockReadGuard::try_map(self.open.read(), |open| open.as_ref().map(|o| &o.db))
            .map_err(|_| StorageError::Closed(self.config.db_path.display().to_string()))
    }

    /// Close the database and release the storage path
    ///
    /// Waits for running transactions. Every later call fails with
    /// [`StorageError::Closed`]. Returns false if already closed.
    pub fn close(&self) -> bool {
        let closed = self.open.write().take().is_some();
        if closed {
            info!(path = %self.config.db_path.display(), "Closed durable queue");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.open.read().is_none()
    }

    /// Persist `entry` and run `apply` in one local transaction
    ///
    /// The row is committed only if `apply` succeeds. If `apply` fails the
    /// transaction is rolled back and the row never becomes visible. A
    /// commit failure after a successful `apply` is returned as an error;
    /// undoing the effects of `apply` is then up to the caller.
    pub fn enqueue_and_apply<T, E>(
        &self,
        entry: &WalEntry,
        apply: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let record = encode_record(entry)?;
        let db = self.db()?;
        let write_txn = db.begin_write().map_err(StorageError::database)?;
        {
            let mut table = write_txn.open_table(WAL).map_err(StorageError::database)?;
            if table
                .get(entry.sequence_nr)
                .map_err(StorageError::database)?
                .is_some()
            {
                return Err(StorageError::DuplicateSequence(entry.sequence_nr).into());
            }
            table
                .insert(entry.sequence_nr, record.as_slice())
                .map_err(StorageError::database)?;
        }

        match apply() {
            Ok(value) => {
                write_txn.commit().map_err(StorageError::database)?;
                self.touch();
                debug!(seq = entry.sequence_nr, "Enqueued entry");
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = write_txn.abort() {
                    warn!(seq = entry.sequence_nr, error = %e, "Abort failed");
                }
                debug!(seq = entry.sequence_nr, "Apply failed, queue row rolled back");
                Err(err)
            }
        }
    }

    fn touch(&self) {
        *self.last_touch.lock() = Some(Instant::now());
        self.enqueued.notify_one();
    }

    /// Resolves once an entry has been enqueued
    ///
    /// An enqueue that happened while nobody was waiting is remembered, so
    /// the next call returns immediately.
    pub async fn wait_enqueued(&self) {
        self.enqueued.notified().await;
    }

    /// When the last entry was enqueued
    pub fn last_touched(&self) -> Option<Instant> {
        *self.last_touch.lock()
    }

    /// Whether an entry was enqueued less than `window` ago
    pub fn touched_within(&self, window: Duration) -> bool {
        self.last_touched().is_some_and(|t| t.elapsed() < window)
    }

    /// Look up one entry
    pub fn get(&self, sequence_nr: u64) -> Result<Option<WalEntry>, StorageError> {
        let db = self.db()?;
        let read_txn = db.begin_read().map_err(StorageError::database)?;
        let table = read_txn.open_table(WAL).map_err(StorageError::database)?;
        let value = table.get(sequence_nr).map_err(StorageError::database)?;
        value
            .map(|v| decode_record(sequence_nr, v.value()))
            .transpose()
    }

    /// All rows in sequence order
    pub fn entries(&self) -> Result<Vec<WalEntry>, StorageError> {
        let mut entries = Vec::new();
        self.scan(|entry| {
            entries.push(entry);
            true
        })?;
        Ok(entries)
    }

    /// Rows not yet confirmed by the remote log, in sequence order
    pub fn pending_entries(&self) -> Result<Vec<WalEntry>, StorageError> {
        let mut entries = Vec::new();
        self.scan(|entry| {
            if !entry.persisted {
                entries.push(entry);
            }
            true
        })?;
        Ok(entries)
    }

    /// The lowest-numbered row not yet confirmed
    pub fn oldest_pending(&self) -> Result<Option<WalEntry>, StorageError> {
        let mut oldest = None;
        self.scan(|entry| {
            if entry.persisted {
                return true;
            }
            oldest = Some(entry);
            false
        })?;
        Ok(oldest)
    }

    // Visits rows in key order until `visit` returns false.
    fn scan(&self, mut visit: impl FnMut(WalEntry) -> bool) -> Result<(), StorageError> {
        let db = self.db()?;
        let read_txn = db.begin_read().map_err(StorageError::database)?;
        let table = read_txn.open_table(WAL).map_err(StorageError::database)?;
        for item in table.iter().map_err(StorageError::database)? {
            let (key, value) = item.map_err(StorageError::database)?;
            if !visit(decode_record(key.value(), value.value())?) {
                break;
            }
        }
        Ok(())
    }

    /// Flag a row as uploaded
    ///
    /// Returns false if the row does not exist.
    #[instrument(skip(self))]
    pub fn mark_persisted(&self, sequence_nr: u64) -> Result<bool, StorageError> {
        let db = self.db()?;
        let write_txn = db.begin_write().map_err(StorageError::database)?;
        let found = {
            let mut table = write_txn.open_table(WAL).map_err(StorageError::database)?;
            let existing = table
                .get(sequence_nr)
                .map_err(StorageError::database)?
                .map(|v| v.value().to_vec());
            match existing {
                Some(bytes) => {
                    let mut entry = decode_record(sequence_nr, &bytes)?;
                    entry.persisted = true;
                    let record = encode_record(&entry)?;
                    table
                        .insert(sequence_nr, record.as_slice())
                        .map_err(StorageError::database)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(StorageError::database)?;
        Ok(found)
    }

    /// Delete one row
    pub fn remove(&self, sequence_nr: u64) -> Result<bool, StorageError> {
        let db = self.db()?;
        let write_txn = db.begin_write().map_err(StorageError::database)?;
        let removed = {
            let mut table = write_txn.open_table(WAL).map_err(StorageError::database)?;
            table
                .remove(sequence_nr)
                .map_err(StorageError::database)?
                .is_some()
        };
        write_txn.commit().map_err(StorageError::database)?;
        Ok(removed)
    }

    /// Replace every pending row with `entries` in one transaction
    ///
    /// Persisted rows are left alone. Used when pending mutations are
    /// renumbered on top of newer remote history.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub fn rewrite_pending(&self, entries: &[WalEntry]) -> Result<(), StorageError> {
        let stale: Vec<u64> = self
            .pending_entries()?
            .into_iter()
            .map(|e| e.sequence_nr)
            .collect();

        let db = self.db()?;
        let write_txn = db.begin_write().map_err(StorageError::database)?;
        {
            let mut table = write_txn.open_table(WAL).map_err(StorageError::database)?;
            for seq in &stale {
                table.remove(*seq).map_err(StorageError::database)?;
            }
            for entry in entries {
                let record = encode_record(entry)?;
                table
                    .insert(entry.sequence_nr, record.as_slice())
                    .map_err(StorageError::database)?;
            }
        }
        write_txn.commit().map_err(StorageError::database)?;

        debug!(removed = stale.len(), "Rewrote pending rows");
        Ok(())
    }

    /// Delete every row the remote log has confirmed
    #[instrument(skip(self))]
    pub fn cleanup_persisted(&self) -> Result<usize, StorageError> {
        let mut persisted = Vec::new();
        self.scan(|entry| {
            if entry.persisted {
                persisted.push(entry.sequence_nr);
            }
            true
        })?;

        let db = self.db()?;
        let write_txn = db.begin_write().map_err(StorageError::database)?;
        {
            let mut table = write_txn.open_table(WAL).map_err(StorageError::database)?;
            for seq in &persisted {
                table.remove(*seq).map_err(StorageError::database)?;
            }
        }
        write_txn.commit().map_err(StorageError::database)?;

        if !persisted.is_empty() {
            info!(removed = persisted.len(), "Cleaned up persisted queue rows");
        }
        Ok(persisted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_queue() -> (DurableQueue, TempDir) {
        let temp = TempDir::new().unwrap();
        let queue = DurableQueue::open(QueueConfig::new(temp.path().join("root.redb"))).unwrap();
        (queue, temp)
    }

    fn entry(seq: u64) -> WalEntry {
        WalEntry::pending(seq, vec![seq as u8; 8])
    }

    #[test]
    fn test_enqueue_commits_on_success() {
        let (queue, _temp) = open_test_queue();

        let out: Result<u32, StorageError> = queue.enqueue_and_apply(&entry(0), || Ok(7));
        assert_eq!(out.unwrap(), 7);

        let stored = queue.get(0).unwrap().unwrap();
        assert_eq!(stored, entry(0));
        assert!(queue.last_touched().is_some());
    }

    #[test]
    fn test_enqueue_rolls_back_on_apply_failure() {
        let (queue, _temp) = open_test_queue();

        let out: Result<(), StorageError> =
            queue.enqueue_and_apply(&entry(0), || Err(StorageError::Corrupt("nope".into())));
        assert!(out.is_err());
        assert!(queue.get(0).unwrap().is_none());
        assert!(queue.entries().unwrap().is_empty());
        assert!(queue.last_touched().is_none());
    }

    #[test]
    fn test_duplicate_sequence_rejected() {
        let (queue, _temp) = open_test_queue();
        let _: () = queue
            .enqueue_and_apply::<_, StorageError>(&entry(0), || Ok(()))
            .unwrap();

        let mut applied = false;
        let out: Result<(), StorageError> = queue.enqueue_and_apply(&entry(0), || {
            applied = true;
            Ok(())
        });
        assert!(matches!(out, Err(StorageError::DuplicateSequence(0))));
        assert!(!applied);
    }

    #[test]
    fn test_persisted_rows_and_cleanup() {
        let (queue, _temp) = open_test_queue();
        for seq in 0..3 {
            queue
                .enqueue_and_apply::<_, StorageError>(&entry(seq), || Ok(()))
                .unwrap();
        }

        assert_eq!(queue.oldest_pending().unwrap().unwrap().sequence_nr, 0);
        assert!(queue.mark_persisted(0).unwrap());
        assert!(!queue.mark_persisted(42).unwrap());
        assert_eq!(queue.oldest_pending().unwrap().unwrap().sequence_nr, 1);
        assert_eq!(queue.pending_entries().unwrap().len(), 2);

        assert_eq!(queue.cleanup_persisted().unwrap(), 1);
        assert_eq!(queue.entries().unwrap().len(), 2);
        assert_eq!(queue.cleanup_persisted().unwrap(), 0);
    }

    #[test]
    fn test_rewrite_pending_keeps_persisted() {
        let (queue, _temp) = open_test_queue();
        for seq in 0..3 {
            queue
                .enqueue_and_apply::<_, StorageError>(&entry(seq), || Ok(()))
                .unwrap();
        }
        queue.mark_persisted(0).unwrap();

        queue.rewrite_pending(&[entry(5), entry(6)]).unwrap();

        let seqs: Vec<u64> = queue
            .entries()
            .unwrap()
            .iter()
            .map(|e| e.sequence_nr)
            .collect();
        assert_eq!(seqs, vec![0, 5, 6]);
        assert!(queue.get(0).unwrap().unwrap().persisted);
    }

    #[test]
    fn test_rows_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let config = QueueConfig::new(temp.path().join("root.redb"));
        {
            let queue = DurableQueue::open(config.clone()).unwrap();
            queue
                .enqueue_and_apply::<_, StorageError>(&entry(0), || Ok(()))
                .unwrap();
        }
        let queue = DurableQueue::open(config).unwrap();
        assert_eq!(queue.pending_entries().unwrap(), vec![entry(0)]);
    }

    #[test]
    fn test_second_open_fails() {
        let (queue, temp) = open_test_queue();
        let second = DurableQueue::open(QueueConfig::new(temp.path().join("root.redb")));
        assert!(matches!(
            second,
            Err(StorageError::SingleInstanceViolation(_))
        ));
        drop(queue);
    }

    #[test]
    fn test_close_releases_path() {
        let temp = TempDir::new().unwrap();
        let config = QueueConfig::new(temp.path().join("root.redb"));
        let queue = DurableQueue::open(config.clone()).unwrap();
        queue
            .enqueue_and_apply::<_, StorageError>(&entry(0), || Ok(()))
            .unwrap();

        assert!(queue.close());
        assert!(queue.is_closed());
        assert!(!queue.close());
        assert!(matches!(queue.pending_entries(), Err(StorageError::Closed(_))));
        assert!(matches!(
            queue.enqueue_and_apply::<_, StorageError>(&entry(1), || Ok(())),
            Err(StorageError::Closed(_))
        ));

        // The old handle is still alive, the path is free again
        let reopened = DurableQueue::open(config).unwrap();
        assert_eq!(reopened.pending_entries().unwrap(), vec![entry(0)]);
        drop(queue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touched_within() {
        let (queue, _temp) = open_test_queue();
        assert!(!queue.touched_within(Duration::from_secs(3)));

        queue
            .enqueue_and_apply::<_, StorageError>(&entry(0), || Ok(()))
            .unwrap();
        assert!(queue.touched_within(Duration::from_secs(3)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!queue.touched_within(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_waiter() {
        let (queue, _temp) = open_test_queue();
        queue
            .enqueue_and_apply::<_, StorageError>(&entry(0), || Ok(()))
            .unwrap();

        // The permit left by the enqueue is consumed by the first wait
        tokio::time::timeout(Duration::from_millis(50), queue.wait_enqueued())
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), queue.wait_enqueued())
                .await
                .is_err()
        );
    }
}
