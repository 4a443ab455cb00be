//! Content-addressed blob stores
//!
//! Both stores implement [`ledgerfs_core::BlobStore`]: blobs are named by
//! their BLAKE3 hash and verified on every load.

mod fs;
mod memory;

pub use fs::{FsBlobStore, FsBlobStoreConfig};
pub use memory::MemoryBlobStore;
