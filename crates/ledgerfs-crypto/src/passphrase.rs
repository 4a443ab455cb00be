//! Passphrase-derived drive keys
//!
//! Argon2id with moderate parameters. The salt binds the key to one drive so
//! the same passphrase yields different keys for different roots.

use argon2::{Argon2, Params, Version};

use crate::drive_key::{DriveKey, KEY_SIZE};
use crate::error::{CryptoError, CryptoResult};

/// Argon2 memory cost in KiB (64 MiB)
pub const ARGON2_MEMORY_KIB: u32 = 64 * 1024;

/// Argon2 time cost
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2 lanes
pub const ARGON2_PARALLELISM: u32 = 1;

const MIN_SALT_LEN: usize = 8;

/// Derive a drive key from a passphrase and a per-drive salt
pub fn derive_drive_key(passphrase: &[u8], salt: &[u8]) -> CryptoResult<DriveKey> {
    derive_with_params(
        passphrase,
        salt,
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
    )
}

fn derive_with_params(
    passphrase: &[u8],
    salt: &[u8],
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
) -> CryptoResult<DriveKey> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be at least {} bytes",
            MIN_SALT_LEN
        )));
    }

    let params = Params::new(memory_kib, iterations, parallelism, Some(KEY_SIZE))
        .map_err(|e| CryptoError::KeyDerivation(format!("Invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(format!("Argon2id failed: {}", e)))?;

    Ok(DriveKey::from_bytes(output))
}
