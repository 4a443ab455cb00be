//! # Ledgerfs Crypto
//!
//! Sealing of event payloads, snapshots and log records.
//!
//! Every byte ledgerfs writes to the local WAL or to remote storage is
//! sealed with the drive's symmetric [`DriveKey`] using ChaCha20-Poly1305.
//! The wire form is `nonce || ciphertext`.
//!
//! Keys are either supplied as raw bytes or derived from a passphrase with
//! Argon2id (see [`passphrase`]).

pub mod drive_key;
pub mod error;
pub mod passphrase;

pub use drive_key::{DriveKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use passphrase::derive_drive_key;
