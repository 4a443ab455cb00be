//! Append-only remote log implementations
//!
//! Streams are named by string and hold opaque records at versions
//! `0, 1, 2, ...`. Appends carry an [`ExpectedVersion`] precondition.
//!
//! [`ExpectedVersion`]: ledgerfs_core::ExpectedVersion

mod file;
mod memory;

pub use file::{FileRemoteLog, FileRemoteLogConfig};
pub use memory::MemoryRemoteLog;

use ledgerfs_core::LogRecord;

// Records strictly after `after`, at most `max` of them.
fn page(records: &[bytes::Bytes], after: Option<u64>, max: usize) -> Vec<LogRecord> {
    let start = after.map(|v| v.saturating_add(1)).unwrap_or(0);
    records
        .iter()
        .enumerate()
        .skip(usize::try_from(start).unwrap_or(usize::MAX))
        .take(max)
        .map(|(version, data)| LogRecord {
            version: version as u64,
            data: data.clone(),
        })
        .collect()
}

fn last_version(records: &[bytes::Bytes]) -> Option<u64> {
    (records.len() as u64).checked_sub(1)
}
