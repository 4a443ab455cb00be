//! Symmetric drive key
//!
//! One key per drive seals the WAL payloads, the events and snapshots on the
//! remote log, and the blobs they point to. Sealed bytes are
//! `nonce(12) || ChaCha20-Poly1305 ciphertext`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

pub const NONCE_SIZE: usize = 12;
pub const KEY_SIZE: usize = 32;
/// Poly1305 tag appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// Secret key of one drive
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DriveKey {
    key: [u8; KEY_SIZE],
}

impl DriveKey {
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Parse the 64 hex digits printed by `ledgerfs keygen`
    pub fn from_hex(hex_key: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not hex: {}", e)))?;
        let len = bytes.len();
        let key = <[u8; KEY_SIZE]>::try_from(bytes).map_err(|_| {
            CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, len))
        })?;
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Seal under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        self.seal_with_nonce(nonce, plaintext)
    }

    /// Seal under a nonce derived from the plaintext
    ///
    /// Equal plaintexts seal to equal bytes under the same key, so sealed
    /// chunks stay content-addressable. Only plaintext equality leaks.
    pub fn seal_convergent(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let digest = blake3::keyed_hash(&self.key, plaintext);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest.as_bytes()[..NONCE_SIZE]);
        self.seal_with_nonce(nonce, plaintext)
    }

    /// Open bytes produced by [`Self::seal`] or [`Self::seal_convergent`]
    pub fn open(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated { len: sealed.len() });
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Open)
    }

    fn seal_with_nonce(&self, nonce: [u8; NONCE_SIZE], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Seal(e.to_string()))?;
        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

impl std::fmt::Debug for DriveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DriveKey(<redacted>)")
    }
}
