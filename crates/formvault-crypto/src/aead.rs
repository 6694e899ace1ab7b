// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Low-level AES-GCM seal/open operations.
//!
//! Every call to [`seal`] generates a fresh random 96-bit nonce via the system
//! CSPRNG. Nonce reuse would be catastrophic for GCM security. The stored-blob
//! helpers prepend the nonce to the ciphertext so a blob is self-contained:
//! `nonce(12) || ciphertext || tag(16)`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use formvault_core::VaultError;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypt plaintext with AES-256-GCM using a random 96-bit nonce.
///
/// Returns `(ciphertext_with_tag, nonce_bytes)`. The caller must store both
/// the ciphertext and the nonce to be able to decrypt later.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; 12]), VaultError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| VaultError::Crypto("failed to create AES-256-GCM key".to_string()))?;
    seal_with(unbound, plaintext)
}

/// Decrypt ciphertext with AES-256-GCM.
///
/// `ciphertext` must include the 16-byte authentication tag appended by
/// [`seal`]. A wrong key or tampered data yields [`VaultError::DecryptionFailure`].
pub fn open(
    key: &[u8; 32],
    nonce_bytes: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| VaultError::Crypto("failed to create AES-256-GCM key".to_string()))?;
    open_with(unbound, nonce_bytes, ciphertext)
}

/// Encrypt plaintext into a self-contained blob: `nonce || ciphertext || tag`.
pub fn seal_blob(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let (ciphertext, nonce) = seal(key, plaintext)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a self-contained blob produced by [`seal_blob`].
pub fn open_blob(key: &[u8; 32], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::DecryptionFailure);
    }
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&blob[..NONCE_LEN]);
    open(key, &nonce_bytes, &blob[NONCE_LEN..])
}

/// Encrypt a sync payload with AES-128-GCM and encode it as base64.
///
/// Sync items travel through a text protocol, so the blob is base64 of
/// `nonce || ciphertext || tag` under the dedicated 128-bit sync key.
pub fn seal_blob_b64(key: &[u8; 16], plaintext: &[u8]) -> Result<String, VaultError> {
    let unbound = UnboundKey::new(&AES_128_GCM, key)
        .map_err(|_| VaultError::Crypto("failed to create AES-128-GCM key".to_string()))?;
    let (ciphertext, nonce) = seal_with(unbound, plaintext)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Decrypt a base64 sync payload produced by [`seal_blob_b64`].
pub fn open_blob_b64(key: &[u8; 16], encoded: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let blob = BASE64
        .decode(encoded)
        .map_err(|_| VaultError::DecryptionFailure)?;
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::DecryptionFailure);
    }
    let unbound = UnboundKey::new(&AES_128_GCM, key)
        .map_err(|_| VaultError::Crypto("failed to create AES-128-GCM key".to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&blob[..NONCE_LEN]);
    open_with(unbound, &nonce_bytes, &blob[NONCE_LEN..])
}

/// Generate a random 32-byte key suitable for AES-256-GCM.
pub fn generate_random_key() -> Result<[u8; 32], VaultError> {
    let rng = SystemRandom::new();
    let mut key = [0u8; 32];
    rng.fill(&mut key)
        .map_err(|_| VaultError::Crypto("failed to generate random key".to_string()))?;
    Ok(key)
}

/// Fill a buffer with CSPRNG bytes (check codes, sync test keys).
pub fn fill_random(buf: &mut [u8]) -> Result<(), VaultError> {
    let rng = SystemRandom::new();
    rng.fill(buf)
        .map_err(|_| VaultError::Crypto("failed to generate random bytes".to_string()))
}

fn seal_with(unbound: UnboundKey, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; 12]), VaultError> {
    let less_safe = LessSafeKey::new(unbound);

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| VaultError::Crypto("failed to generate random nonce".to_string()))?;

    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    // Seal in place: plaintext buffer is extended with the authentication tag.
    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::Crypto("AES-GCM encryption failed".to_string()))?;

    Ok((in_out, nonce_bytes))
}

fn open_with(
    unbound: UnboundKey,
    nonce_bytes: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let less_safe = LessSafeKey::new(unbound);
    let nonce = Nonce::assume_unique_for_key(*nonce_bytes);

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = less_safe
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::DecryptionFailure)?
        .len();

    in_out.truncate(plaintext_len);
    Ok(in_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_random_key().unwrap();
        let plaintext = b"stored form password";

        let (ciphertext, nonce) = seal(&key, plaintext).unwrap();
        let decrypted = open(&key, &nonce, &ciphertext).unwrap();

        assert_eq!(&*decrypted, plaintext);
    }

    #[test]
    fn seal_produces_different_ciphertext_for_same_plaintext() {
        let key = generate_random_key().unwrap();
        let plaintext = b"same input twice";

        let (ct1, nonce1) = seal(&key, plaintext).unwrap();
        let (ct2, nonce2) = seal(&key, plaintext).unwrap();

        // Random nonces should differ.
        assert_ne!(nonce1, nonce2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let key1 = generate_random_key().unwrap();
        let key2 = generate_random_key().unwrap();

        let (ciphertext, nonce) = seal(&key1, b"secret data").unwrap();
        let result = open(&key2, &nonce, &ciphertext);

        assert!(matches!(result, Err(VaultError::DecryptionFailure)));
    }

    #[test]
    fn tampered_blob_fails_decryption() {
        let key = generate_random_key().unwrap();
        let mut blob = seal_blob(&key, b"do not tamper").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        assert!(open_blob(&key, &blob).is_err());
    }

    #[test]
    fn truncated_blob_is_rejected_not_panicked() {
        let key = generate_random_key().unwrap();
        assert!(open_blob(&key, &[0u8; 5]).is_err());
        assert!(open_blob(&key, &[]).is_err());
    }

    #[test]
    fn b64_blob_roundtrip_with_sync_key() {
        let mut key = [0u8; 16];
        fill_random(&mut key).unwrap();

        let encoded = seal_blob_b64(&key, b"alice@example.org").unwrap();
        let decoded = open_blob_b64(&key, &encoded).unwrap();

        assert_eq!(&*decoded, b"alice@example.org");
    }

    #[test]
    fn b64_blob_with_rotated_key_fails() {
        let mut key1 = [0u8; 16];
        let mut key2 = [0u8; 16];
        fill_random(&mut key1).unwrap();
        fill_random(&mut key2).unwrap();

        let encoded = seal_blob_b64(&key1, b"payload").unwrap();
        assert!(matches!(
            open_blob_b64(&key2, &encoded),
            Err(VaultError::DecryptionFailure)
        ));
    }

    #[test]
    fn garbage_base64_is_rejected() {
        let key = [7u8; 16];
        assert!(open_blob_b64(&key, "not base64 !!!").is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // GCM authentication must reject a flip of any single bit,
            // whether it lands in the nonce, the ciphertext or the tag.
            #[test]
            fn any_bit_flip_breaks_authentication(
                plaintext in proptest::collection::vec(any::<u8>(), 1..64),
                position in any::<proptest::sample::Index>(),
                bit in 0u8..8,
            ) {
                let key = [42u8; 32];
                let mut blob = seal_blob(&key, &plaintext).unwrap();
                let index = position.index(blob.len());
                blob[index] ^= 1 << bit;
                prop_assert!(open_blob(&key, &blob).is_err());
            }
        }
    }
}
