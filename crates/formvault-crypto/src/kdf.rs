// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master key derivation.
//!
//! All vault keys come out of Argon2id (version 0x13) as 32 bytes. The
//! session layer derives two kinds: a verification key that seals the check
//! code, and the master key proper. Both mix a context value into the
//! passphrase before hashing, so the same typed password never yields the
//! same key for two purposes; [`derive_key_with_context`] owns that mixing
//! so the secret concatenation lives in one zeroized buffer.

use formvault_core::VaultError;
use zeroize::Zeroizing;

use crate::aead::fill_random;

/// Argon2id cost parameters, carried as one value through the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // Matches the config defaults (OWASP recommendation).
        Self {
            memory_cost: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Derive a 32-byte key from a secret, wiped on drop.
pub fn derive_key(
    secret: &[u8],
    salt: &[u8; 16],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let argon_params = argon2::Params::new(
        params.memory_cost,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| VaultError::Crypto(format!("Argon2id parameters: {e}")))?;
    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(secret, salt, key.as_mut())
        .map_err(|e| VaultError::Crypto(format!("Argon2id derivation: {e}")))?;
    Ok(key)
}

/// Derive a key from `secret ++ context`.
///
/// The context separates key purposes: the verification key appends a fixed
/// domain tag, the master key appends the decrypted check code.
pub fn derive_key_with_context(
    secret: &[u8],
    context: &[u8],
    salt: &[u8; 16],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let mut material = Zeroizing::new(Vec::with_capacity(secret.len() + context.len()));
    material.extend_from_slice(secret);
    material.extend_from_slice(context);
    derive_key(&material, salt, params)
}

/// Fresh random 16-byte Argon2id salt.
pub fn generate_salt() -> Result<[u8; 16], VaultError> {
    let mut salt = [0u8; 16];
    fill_random(&mut salt)?;
    Ok(salt)
}
