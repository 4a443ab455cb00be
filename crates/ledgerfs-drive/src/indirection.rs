//! Content indirection
//!
//! Content below the threshold travels inline in the event. Larger content is
//! split into sealed chunks in blob storage and the event carries the encoded
//! [`BlobMap`] instead. When even the map reaches the threshold it is stored
//! the same way one level up, until the top map fits.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use ledgerfs_core::{BlobMap, BlobStore, ContentLocator, CoreError};
use tracing::{debug, instrument};

use crate::codec::EventCodec;
use crate::error::{DriveError, DriveResult};

/// Moves large content between events and blob storage
#[derive(Clone)]
pub struct ContentIndirection {
    blobs: Arc<dyn BlobStore>,
    codec: EventCodec,
    threshold: usize,
    chunk_size: usize,
}

impl ContentIndirection {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        codec: EventCodec,
        threshold: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            blobs,
            codec,
            threshold,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Size at which content stops being inline
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Build the locator for `content`, storing chunks as needed
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub async fn locate(&self, content: Bytes) -> DriveResult<ContentLocator> {
        if content.len() < self.threshold {
            return Ok(ContentLocator::inline(content));
        }

        let content_id = *blake3::hash(&content).as_bytes();
        let size = content.len() as u64;
        let mut level = 0u8;
        let mut data = content;

        loop {
            let mut chunks = Vec::with_capacity(data.len().div_ceil(self.chunk_size));
            for chunk in data.chunks(self.chunk_size) {
                let sealed = self.codec.seal_chunk(chunk)?;
                chunks.push(self.blobs.put(&sealed).await?);
            }
            let map = BlobMap { level, chunks }.encode()?;

            if map.len() < self.threshold {
                debug!(level, map_len = map.len(), "Content stored indirectly");
                return Ok(ContentLocator::indirect(content_id, size, Bytes::from(map)));
            }
            if map.len() >= data.len() {
                return Err(CoreError::Rejected(format!(
                    "chunk size {} too small for threshold {}",
                    self.chunk_size, self.threshold
                ))
                .into());
            }

            data = Bytes::from(map);
            level = level
                .checked_add(1)
                .ok_or_else(|| CoreError::Rejected("blob map nesting too deep".into()))?;
        }
    }

    /// Recover the content a locator names
    #[instrument(skip(self, locator), fields(content = %locator.short_id()))]
    pub async fn resolve(&self, locator: &ContentLocator) -> DriveResult<Bytes> {
        if !locator.is_indirect {
            if !locator.verifies(&locator.payload) {
                return Err(corrupt("inline content does not match its id"));
            }
            return Ok(locator.payload.clone());
        }

        let mut map = BlobMap::decode(&locator.payload)?;
        loop {
            let mut data = BytesMut::with_capacity(map.chunk_bytes() as usize);
            for chunk in &map.chunks {
                let sealed = self.blobs.get(chunk).await?;
                data.extend_from_slice(&self.codec.open_chunk(&sealed)?);
            }
            let data = data.freeze();

            if map.level == 0 {
                if !locator.verifies(&data) {
                    return Err(corrupt("reassembled content does not match its id"));
                }
                return Ok(data);
            }

            let next = BlobMap::decode(&data)?;
            if next.level.checked_add(1) != Some(map.level) {
                return Err(corrupt("blob map levels out of order"));
            }
            map = next;
        }
    }
}

fn corrupt(msg: &str) -> DriveError {
    DriveError::Remote(CoreError::Corrupt(msg.to_string()))
}
