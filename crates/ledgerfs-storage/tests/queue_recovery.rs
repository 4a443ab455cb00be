//! Durable queue behavior across open/close cycles

use ledgerfs_storage::{DurableQueue, QueueConfig, StorageError, WalEntry};
use tempfile::TempDir;

#[derive(Debug)]
enum ApplyError {
    Storage(StorageError),
    Rejected,
}

impl From<StorageError> for ApplyError {
    fn from(err: StorageError) -> Self {
        ApplyError::Storage(err)
    }
}

#[test]
fn failed_apply_leaves_no_row_after_reopen() {
    let temp = TempDir::new().unwrap();
    let config = QueueConfig::for_root(temp.path(), "ledger_vol_mnt");

    {
        let queue = DurableQueue::open(config.clone()).unwrap();
        let mut state = vec![0u64];

        let ok: Result<(), ApplyError> =
            queue.enqueue_and_apply(&WalEntry::pending(1, vec![1u8]), || {
                state.push(1);
                Ok(())
            });
        assert!(ok.is_ok());

        let failed: Result<(), ApplyError> =
            queue.enqueue_and_apply(&WalEntry::pending(2, vec![2u8]), || Err(ApplyError::Rejected));
        assert!(matches!(failed, Err(ApplyError::Rejected)));
        assert_eq!(state, vec![0, 1]);
    }

    let queue = DurableQueue::open(config).unwrap();
    let seqs: Vec<u64> = queue
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| e.sequence_nr)
        .collect();
    assert_eq!(seqs, vec![1]);
}

#[test]
fn distinct_roots_open_side_by_side() {
    let temp = TempDir::new().unwrap();
    let a = DurableQueue::open(QueueConfig::for_root(temp.path(), "root_a")).unwrap();
    let b = DurableQueue::open(QueueConfig::for_root(temp.path(), "root_b")).unwrap();

    let again = DurableQueue::open(QueueConfig::for_root(temp.path(), "root_a"));
    assert!(matches!(again, Err(StorageError::SingleInstanceViolation(_))));

    drop(a);
    drop(b);
    assert!(DurableQueue::open(QueueConfig::for_root(temp.path(), "root_a")).is_ok());
}
