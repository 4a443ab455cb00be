//! Sealing of events, records and blob chunks

use std::sync::Arc;

use bytes::Bytes;
use ledgerfs_crypto::DriveKey;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::DriveResult;

/// Postcard encoding plus drive-key encryption
#[derive(Clone)]
pub struct EventCodec {
    key: Arc<DriveKey>,
}

impl EventCodec {
    /// Codec sealing with `key`
    pub fn new(key: DriveKey) -> Self {
        Self { key: Arc::new(key) }
    }

    /// Encode and encrypt a value under a fresh nonce
    pub fn seal<T: Serialize>(&self, value: &T) -> DriveResult<Bytes> {
        let plain = postcard::to_allocvec(value)?;
        Ok(Bytes::from(self.key.seal(&plain)?))
    }

    /// Decrypt and decode a value sealed with [`Self::seal`]
    pub fn open<T: DeserializeOwned>(&self, data: &[u8]) -> DriveResult<T> {
        let plain = self.key.open(data)?;
        Ok(postcard::from_bytes(&plain)?)
    }

    /// Encrypt a blob chunk; equal chunks seal to equal bytes
    pub fn seal_chunk(&self, chunk: &[u8]) -> DriveResult<Vec<u8>> {
        Ok(self.key.seal_convergent(chunk)?)
    }

    /// Decrypt a chunk sealed with [`Self::seal_chunk`]
    pub fn open_chunk(&self, data: &[u8]) -> DriveResult<Vec<u8>> {
        Ok(self.key.open(data)?)
    }
}

impl std::fmt::Debug for EventCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriveError;
    use ledgerfs_core::{ItemId, LocalEvent};

    #[test]
    fn test_seal_and_open_event() {
        let codec = EventCodec::new(DriveKey::generate());
        let event = LocalEvent::FileContentSet {
            sequence_nr: 3,
            item_id: ItemId::generate(),
            content: Bytes::from_static(b"payload"),
        };
        let sealed = codec.seal(&event).unwrap();
        assert!(!sealed.windows(7).any(|w| w == b"payload"));

        let opened: LocalEvent = codec.open(&sealed).unwrap();
        assert_eq!(opened, event);
    }

    #[test]
    fn test_wrong_key_is_crypto_error() {
        let sealed = EventCodec::new(DriveKey::generate()).seal(&1u64).unwrap();
        let other = EventCodec::new(DriveKey::generate());
        assert!(matches!(
            other.open::<u64>(&sealed),
            Err(DriveError::Crypto(_))
        ));
    }

    #[test]
    fn test_chunks_are_convergent() {
        let codec = EventCodec::new(DriveKey::generate());
        let a = codec.seal_chunk(b"chunk").unwrap();
        assert_eq!(a, codec.seal_chunk(b"chunk").unwrap());
        assert_eq!(codec.open_chunk(&a).unwrap(), b"chunk");
    }
}
