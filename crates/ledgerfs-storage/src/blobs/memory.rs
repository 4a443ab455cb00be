//! In-memory blob store

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use ledgerfs_core::{BlobStore, ContentRef, CoreError, CoreResult};

use crate::fault::{Fault, FaultSwitch};

/// Blob store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<[u8; 32], Bytes>,
    fault: FaultSwitch,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `fault` (or stop failing)
    pub fn set_fault(&self, fault: Option<Fault>) {
        self.fault.set(fault);
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Overwrite a stored blob's bytes without updating its name
    pub fn corrupt(&self, content_ref: &ContentRef, data: Bytes) -> bool {
        match self.blobs.get_mut(&content_ref.hash) {
            Some(mut blob) => {
                *blob = data;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: &[u8]) -> CoreResult<ContentRef> {
        self.fault.check("put")?;
        let content_ref = ContentRef::from_data(data);
        self.blobs
            .entry(content_ref.hash)
            .or_insert_with(|| Bytes::copy_from_slice(data));
        Ok(content_ref)
    }

    async fn get(&self, content_ref: &ContentRef) -> CoreResult<Bytes> {
        self.fault.check("get")?;
        let data = self
            .blobs
            .get(&content_ref.hash)
            .map(|b| b.value().clone())
            .ok_or_else(|| CoreError::NotFound(content_ref.hash_hex()))?;
        if !content_ref.matches(&data) {
            return Err(CoreError::Corrupt(format!(
                "blob {} failed verification",
                content_ref.short_hash()
            )));
        }
        Ok(data)
    }
}
