//! Configuration for a drive

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every root a drive mounts
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// Directory holding one WAL store per root
    pub storage_dir: PathBuf,
    /// Debounce window and starting delay of the uploader
    pub min_delay: Duration,
    /// Lowest delay the uploader shrinks to while draining
    pub drain_floor: Duration,
    /// Upper bound on the retry delay after transient failures
    pub max_backoff: Duration,
    /// Content of at least this many bytes is moved out of events into blob storage
    pub indirection_threshold: usize,
    /// Chunk size used when splitting indirect content
    pub chunk_size: usize,
    /// Records fetched per remote read
    pub read_page_size: usize,
    /// Conflict resolutions tried for one entry before giving up
    pub max_resolve_attempts: u32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./ledgerfs-data"),
            min_delay: Duration::from_secs(3),
            drain_floor: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
            indirection_threshold: 20_000,
            chunk_size: 1024 * 1024, // 1 MiB
            read_page_size: 256,
            max_resolve_attempts: 5,
        }
    }
}

impl DriveConfig {
    /// Create a configuration with a custom storage directory
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Default::default()
        }
    }

    /// Set the uploader's debounce window
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Set the lowest drain delay
    pub fn with_drain_floor(mut self, drain_floor: Duration) -> Self {
        self.drain_floor = drain_floor;
        self
    }

    /// Set the retry delay cap
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Set the indirection threshold and chunk size
    pub fn with_indirection(mut self, threshold: usize, chunk_size: usize) -> Self {
        self.indirection_threshold = threshold;
        self.chunk_size = chunk_size;
        self
    }

    /// Set the remote read page size
    pub fn with_read_page_size(mut self, read_page_size: usize) -> Self {
        self.read_page_size = read_page_size;
        self
    }

    /// Set how often one entry's conflicts are resolved before giving up
    pub fn with_max_resolve_attempts(mut self, attempts: u32) -> Self {
        self.max_resolve_attempts = attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriveConfig::default();
        assert_eq!(config.min_delay, Duration::from_secs(3));
        assert_eq!(config.indirection_threshold, 20_000);
        assert_eq!(config.chunk_size, 1 << 20);
    }

    #[test]
    fn test_builders() {
        let config = DriveConfig::with_storage_dir("/tmp/drive")
            .with_min_delay(Duration::from_millis(50))
            .with_indirection(128, 32);
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/drive"));
        assert_eq!(config.min_delay, Duration::from_millis(50));
        assert_eq!(config.chunk_size, 32);
        assert_eq!(config.max_resolve_attempts, 5);
    }
}
