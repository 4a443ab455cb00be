//! File-backed remote log
//!
//! Each stream is one file of length-prefixed frames (4-byte big-endian
//! length, then the record). Files are replayed into memory the first time a
//! stream is touched; appends go to the end of the file.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use ledgerfs_core::{AppendOutcome, CoreResult, ExpectedVersion, LogRecord, RemoteLog};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{last_version, page};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct FileRemoteLogConfig {
    /// One `<blake3(stream)>.log` file per stream lives here
    pub dir: PathBuf,
    /// `fdatasync` after every append
    pub fsync: bool,
    pub max_record_size: usize,
}

impl FileRemoteLogConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fsync: true,
            max_record_size: 16 * 1024 * 1024,
        }
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }
}

struct StreamFile {
    file: File,
    records: Vec<Bytes>,
    /// Length of the file up to the last whole frame
    end: u64,
}

/// Append-only streams stored as local files
pub struct FileRemoteLog {
    config: FileRemoteLogConfig,
    streams: Mutex<HashMap<String, StreamFile>>,
}

impl FileRemoteLog {
    pub async fn new(config: FileRemoteLogConfig) -> StorageResult<Self> {
        tokio::fs::create_dir_all(&config.dir).await?;
        info!(dir = %config.dir.display(), "Remote log opened");
        Ok(Self {
            config,
            streams: Mutex::new(HashMap::new()),
        })
    }

    fn stream_path(&self, stream: &str) -> PathBuf {
        let name = hex::encode(blake3::hash(stream.as_bytes()).as_bytes());
        self.config.dir.join(format!("{}.log", name))
    }

    /// The cached stream, replayed from disk on first use
    async fn stream_entry<'a>(
        &self,
        streams: &'a mut HashMap<String, StreamFile>,
        stream: &str,
    ) -> StorageResult<&'a mut StreamFile> {
        if !streams.contains_key(stream) {
            let opened = self.replay(stream).await?;
            streams.insert(stream.to_string(), opened);
        }
        streams
            .get_mut(stream)
            .ok_or_else(|| StorageError::Missing(stream.to_string()))
    }

    #[instrument(skip(self))]
    async fn replay(&self, stream: &str) -> StorageResult<StreamFile> {
        let path = self.stream_path(stream);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut offset = 0usize;
        while let Some(header) = data.get(offset..offset + 4) {
            let mut len = [0u8; 4];
            len.copy_from_slice(header);
            let len = u32::from_be_bytes(len) as usize;
            if len > self.config.max_record_size {
                warn!(offset, len, "Frame length out of range, stopping replay");
                break;
            }
            let Some(record) = data.get(offset + 4..offset + 4 + len) else {
                break;
            };
            records.push(Bytes::copy_from_slice(record));
            offset += 4 + len;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if offset < data.len() {
            warn!(offset, file_len = data.len(), "Truncating torn tail");
            file.set_len(offset as u64).await?;
        }

        debug!(records = records.len(), "Stream replayed");
        Ok(StreamFile {
            file,
            records,
            end: offset as u64,
        })
    }

    /// Append one frame, cutting the file back to `entry.end` on failure
    async fn write_frame(&self, entry: &mut StreamFile, data: &[u8]) -> StorageResult<()> {
        let mut frame = Vec::with_capacity(4 + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
        frame.extend_from_slice(data);

        let file = &mut entry.file;
        let written = async {
            file.write_all(&frame).await?;
            file.flush().await?;
            if self.config.fsync {
                file.sync_data().await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = written {
            warn!(end = entry.end, error = %e, "Frame write failed, rewinding");
            if let Err(undo) = entry.file.set_len(entry.end).await {
                warn!(error = %undo, "Rewind failed, the stream is replayed on next use");
            }
            return Err(e.into());
        }
        entry.end += frame.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl RemoteLog for FileRemoteLog {
    async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        data: Bytes,
    ) -> CoreResult<AppendOutcome> {
        if data.len() > self.config.max_record_size {
            return Err(StorageError::too_large(data.len(), self.config.max_record_size as u64).into());
        }

        let mut streams = self.streams.lock().await;
        let entry = self.stream_entry(&mut streams, stream).await?;
        let current = last_version(&entry.records);
        if !expected.is_satisfied_by(current) {
            debug!(stream, ?expected, ?current, "Append precondition failed");
            return Ok(AppendOutcome::VersionConflict { current });
        }

        if let Err(e) = self.write_frame(entry, &data).await {
            // Drop the handle; the next use replays and drops any torn tail
            streams.remove(stream);
            return Err(e.into());
        }
        entry.records.push(data);
        Ok(AppendOutcome::Success {
            version: entry.records.len() as u64 - 1,
        })
    }

    async fn read(
        &self,
        stream: &str,
        after: Option<u64>,
        max: usize,
    ) -> CoreResult<Vec<LogRecord>> {
        let mut streams = self.streams.lock().await;
        let entry = self.stream_entry(&mut streams, stream).await?;
        Ok(page(&entry.records, after, max))
    }

    async fn last_version(&self, stream: &str) -> CoreResult<Option<u64>> {
        let mut streams = self.streams.lock().await;
        let entry = self.stream_entry(&mut streams, stream).await?;
        Ok(last_version(&entry.records))
    }
}
