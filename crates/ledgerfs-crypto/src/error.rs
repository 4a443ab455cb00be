//! Crypto errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Sealing failed: {0}")]
    Seal(String),

    /// Wrong key or damaged ciphertext; the AEAD cannot tell which
    #[error("Sealed data could not be opened with this key")]
    Open,

    #[error("Sealed data is truncated ({len} bytes)")]
    Truncated { len: usize },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
