//! Blob store on a local directory
//!
//! Blobs live at `<root>/<h0h1>/<h2h3>/<hash>` (with the default fan-out of
//! two levels). A blob is written to a `.partial` file next to its final
//! path and renamed into place, so a reader never sees half a blob.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use ledgerfs_core::{BlobStore, ContentRef, CoreResult};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct FsBlobStoreConfig {
    pub root: PathBuf,
    /// Directory levels of two hex digits each above a blob
    pub fanout: u8,
    /// Largest blob accepted, in bytes
    pub max_blob_size: u64,
}

impl FsBlobStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fanout: 2,
            max_blob_size: 64 * 1024 * 1024,
        }
    }

    pub fn with_max_blob_size(mut self, max: u64) -> Self {
        self.max_blob_size = max;
        self
    }
}

/// Content-addressed store of sealed chunks on the local filesystem
#[derive(Debug)]
pub struct FsBlobStore {
    config: FsBlobStoreConfig,
}

impl FsBlobStore {
    pub async fn new(config: FsBlobStoreConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.root).await?;
        info!(root = %config.root.display(), "Blob store opened");
        Ok(Self { config })
    }

    fn path_for(&self, blob: &ContentRef) -> PathBuf {
        let hex = blob.hash_hex();
        let mut path = self.config.root.clone();
        for level in 0..usize::from(self.config.fanout) {
            if let Some(part) = hex.get(level * 2..level * 2 + 2) {
                path.push(part);
            }
        }
        path.push(&hex);
        path
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn write_blob(&self, data: &[u8]) -> StorageResult<ContentRef> {
        if data.len() as u64 > self.config.max_blob_size {
            return Err(StorageError::too_large(data.len(), self.config.max_blob_size));
        }

        let blob = ContentRef::from_data(data);
        let path = self.path_for(&blob);
        if fs::try_exists(&path).await? {
            debug!(blob = %blob.short_hash(), "Blob already stored");
            return Ok(blob);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let partial = path.with_extension("partial");
        let mut file = fs::File::create(&partial).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&partial, &path).await?;

        debug!(blob = %blob.short_hash(), "Blob stored");
        Ok(blob)
    }

    #[instrument(skip(self), fields(blob = %blob.short_hash()))]
    async fn read_blob(&self, blob: &ContentRef) -> StorageResult<Bytes> {
        let data = match fs::read(self.path_for(blob)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::Missing(blob.hash_hex()));
            }
            Err(e) => return Err(e.into()),
        };
        if !blob.matches(&data) {
            warn!(len = data.len(), "Blob does not match its hash");
            return Err(StorageError::Corrupt(format!(
                "blob {} does not match its hash",
                blob.short_hash()
            )));
        }
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: &[u8]) -> CoreResult<ContentRef> {
        Ok(self.write_blob(data).await?)
    }

    async fn get(&self, blob: &ContentRef) -> CoreResult<Bytes> {
        Ok(self.read_blob(blob).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerfs_core::CoreError;
    use tempfile::TempDir;

    async fn store(temp: &TempDir) -> FsBlobStore {
        FsBlobStore::new(FsBlobStoreConfig::new(temp.path().join("blobs")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_and_dedup() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp).await;

        let first = blobs.put(b"sealed chunk").await.unwrap();
        let again = blobs.put(b"sealed chunk").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.size, 12);
        assert_eq!(&blobs.get(&first).await.unwrap()[..], b"sealed chunk");

        let hex = first.hash_hex();
        let on_disk = temp
            .path()
            .join("blobs")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(&hex);
        assert!(on_disk.exists());
        assert!(!on_disk.with_extension("partial").exists());
    }

    #[tokio::test]
    async fn test_tampered_blob_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp).await;
        let blob = blobs.put(b"original").await.unwrap();

        fs::write(blobs.path_for(&blob), b"tampered").await.unwrap();
        assert!(matches!(blobs.get(&blob).await, Err(CoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_missing_and_oversized() {
        let temp = TempDir::new().unwrap();
        let blobs = FsBlobStore::new(
            FsBlobStoreConfig::new(temp.path()).with_max_blob_size(4),
        )
        .await
        .unwrap();

        let absent = ContentRef::from_data(b"never stored");
        assert!(matches!(blobs.get(&absent).await, Err(CoreError::NotFound(_))));
        assert!(matches!(blobs.put(b"too large").await, Err(CoreError::Rejected(_))));
    }
}
