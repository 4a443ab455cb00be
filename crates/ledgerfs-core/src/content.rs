//! Content references and locators
//!
//! Event payloads either embed file content directly or point at
//! content-addressed blobs. Pointers are [`BlobMap`]s; a map that is itself
//! too large is stored as content one level up.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Name of one stored chunk: its BLAKE3 digest and length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub hash: [u8; 32],
    pub size: u64,
}

impl ContentRef {
    pub fn new(hash: [u8; 32], size: u64) -> Self {
        Self { hash, size }
    }

    /// Digest `data` and record its length
    pub fn from_data(data: &[u8]) -> Self {
        Self::new(*blake3::hash(data).as_bytes(), data.len() as u64)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// First four digest bytes in hex, for logs
    pub fn short_hash(&self) -> String {
        hex::encode(&self.hash[..4])
    }

    /// Whether `data` is the content this reference names
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() as u64 == self.size && *blake3::hash(data).as_bytes() == self.hash
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..({}B)", self.short_hash(), self.size)
    }
}

/// Pointer structure for indirect content
///
/// At level 0 the chunks, concatenated, are the content. At level `n > 0`
/// they concatenate to the postcard encoding of a level `n - 1` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMap {
    /// Nesting level
    pub level: u8,
    /// Ordered chunk references
    pub chunks: Vec<ContentRef>,
}

impl BlobMap {
    /// Total size of the bytes this map's chunks concatenate to
    pub fn chunk_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    /// Encode with postcard
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode from postcard bytes
    pub fn decode(data: &[u8]) -> Result<Self, CoreError> {
        Ok(postcard::from_bytes(data)?)
    }
}

/// Content as carried by a [`NetworkEvent`](crate::NetworkEvent)
///
/// When `is_indirect` is false, `payload` is the literal content. Otherwise
/// it is an encoded [`BlobMap`] pointing into blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLocator {
    /// BLAKE3 hash of the full content
    pub content_id: [u8; 32],
    /// Length of the full content in bytes
    pub size: u64,
    /// Whether `payload` is a pointer rather than the content
    pub is_indirect: bool,
    /// Literal content or encoded blob map
    pub payload: Bytes,
}

impl ContentLocator {
    /// Locator carrying the content inline
    pub fn inline(content: Bytes) -> Self {
        Self {
            content_id: *blake3::hash(&content).as_bytes(),
            size: content.len() as u64,
            is_indirect: false,
            payload: content,
        }
    }

    /// Locator pointing at an encoded blob map
    pub fn indirect(content_id: [u8; 32], size: u64, map_bytes: Bytes) -> Self {
        Self {
            content_id,
            size,
            is_indirect: true,
            payload: map_bytes,
        }
    }

    /// Short content id for logging
    pub fn short_id(&self) -> String {
        hex::encode(&self.content_id[..4])
    }

    /// Whether `data` is the content this locator names
    pub fn verifies(&self, data: &[u8]) -> bool {
        data.len() as u64 == self.size && *blake3::hash(data).as_bytes() == self.content_id
    }
}
