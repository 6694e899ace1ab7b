// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mode-tagged encrypted secret buffers.
//!
//! A [`PasswordBlob`] holds one secret as ciphertext plus a tag saying which
//! regime sealed it. Plaintext only exists transiently inside [`Zeroizing`]
//! buffers; the blob itself never stores it. Regime transitions build the
//! replacement ciphertext in full before touching the blob, so a failed
//! transition leaves the original intact.

use formvault_core::VaultError;
use zeroize::Zeroizing;

use crate::aead::{open_blob, seal_blob};
use crate::obfuscate::OBFUSCATION_KEY;

/// Which key sealed the blob's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMode {
    /// No secret stored.
    Empty,
    /// Sealed under the fixed obfuscation key.
    Obfuscated,
    /// Sealed under the master-password-derived key.
    Encrypted,
}

impl BlobMode {
    /// On-disk tag byte.
    pub fn tag(self) -> u8 {
        match self {
            BlobMode::Empty => 0,
            BlobMode::Obfuscated => 1,
            BlobMode::Encrypted => 2,
        }
    }

    /// Parse an on-disk tag byte.
    pub fn from_tag(tag: u8) -> Result<Self, VaultError> {
        match tag {
            0 => Ok(BlobMode::Empty),
            1 => Ok(BlobMode::Obfuscated),
            2 => Ok(BlobMode::Encrypted),
            other => Err(VaultError::Corrupt(format!("unknown blob mode tag {other}"))),
        }
    }
}

/// One stored secret: ciphertext plus the regime that sealed it.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordBlob {
    mode: BlobMode,
    data: Vec<u8>,
}

impl std::fmt::Debug for PasswordBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordBlob")
            .field("mode", &self.mode)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Default for PasswordBlob {
    fn default() -> Self {
        Self::empty()
    }
}

impl PasswordBlob {
    /// A blob holding no secret.
    pub fn empty() -> Self {
        Self {
            mode: BlobMode::Empty,
            data: Vec::new(),
        }
    }

    /// Seal a plaintext under the obfuscation key.
    pub fn obfuscate(plaintext: &str) -> Result<Self, VaultError> {
        if plaintext.is_empty() {
            return Ok(Self::empty());
        }
        Ok(Self {
            mode: BlobMode::Obfuscated,
            data: seal_blob(&OBFUSCATION_KEY, plaintext.as_bytes())?,
        })
    }

    /// Seal a plaintext under the master key.
    pub fn encrypt(plaintext: &str, master_key: &[u8; 32]) -> Result<Self, VaultError> {
        if plaintext.is_empty() {
            return Ok(Self::empty());
        }
        Ok(Self {
            mode: BlobMode::Encrypted,
            data: seal_blob(master_key, plaintext.as_bytes())?,
        })
    }

    /// Reassemble a blob read from disk.
    pub fn from_parts(tag: u8, data: Vec<u8>) -> Result<Self, VaultError> {
        let mode = BlobMode::from_tag(tag)?;
        if mode == BlobMode::Empty && !data.is_empty() {
            return Err(VaultError::Corrupt("empty blob with payload".to_string()));
        }
        Ok(Self { mode, data })
    }

    pub fn mode(&self) -> BlobMode {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.mode == BlobMode::Empty
    }

    /// Ciphertext bytes for the on-disk codec.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decrypt with whichever key the mode requires.
    ///
    /// `Encrypted` blobs need the master key; asking without one is a
    /// [`VaultError::DecryptionFailure`], not a panic.
    pub fn reveal(&self, master_key: Option<&[u8; 32]>) -> Result<Zeroizing<String>, VaultError> {
        let plaintext = match self.mode {
            BlobMode::Empty => return Ok(Zeroizing::new(String::new())),
            BlobMode::Obfuscated => open_blob(&OBFUSCATION_KEY, &self.data)?,
            BlobMode::Encrypted => {
                let key = master_key.ok_or(VaultError::DecryptionFailure)?;
                open_blob(key, &self.data)?
            }
        };
        let s = String::from_utf8(plaintext.to_vec())
            .map_err(|_| VaultError::Corrupt("stored secret is not valid UTF-8".to_string()))?;
        Ok(Zeroizing::new(s))
    }

    /// Transition Obfuscated -> Encrypted. Empty and already-Encrypted blobs
    /// are untouched.
    pub fn upgrade(&mut self, master_key: &[u8; 32]) -> Result<(), VaultError> {
        if self.mode != BlobMode::Obfuscated {
            return Ok(());
        }
        let plaintext = self.reveal(None)?;
        let replacement = Self::encrypt(&plaintext, master_key)?;
        *self = replacement;
        Ok(())
    }

    /// Transition Encrypted -> Obfuscated. Empty and already-Obfuscated
    /// blobs are untouched.
    pub fn downgrade(&mut self, master_key: &[u8; 32]) -> Result<(), VaultError> {
        if self.mode != BlobMode::Encrypted {
            return Ok(());
        }
        let plaintext = self.reveal(Some(master_key))?;
        let replacement = Self::obfuscate(&plaintext)?;
        *self = replacement;
        Ok(())
    }

    /// Re-seal an Encrypted blob under a new master key.
    pub fn rekey(&mut self, old_key: &[u8; 32], new_key: &[u8; 32]) -> Result<(), VaultError> {
        if self.mode != BlobMode::Encrypted {
            return Ok(());
        }
        let plaintext = self.reveal(Some(old_key))?;
        let replacement = Self::encrypt(&plaintext, new_key)?;
        *self = replacement;
        Ok(())
    }

    /// Compare decrypted contents. Ciphertext bytes never match between two
    /// seals of the same plaintext (random nonces), so equality must go
    /// through decryption.
    pub fn reveals_same(
        &self,
        other: &Self,
        master_key: Option<&[u8; 32]>,
    ) -> Result<bool, VaultError> {
        Ok(*self.reveal(master_key)? == *other.reveal(master_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::generate_random_key;

    #[test]
    fn obfuscated_roundtrip() {
        let blob = PasswordBlob::obfuscate("hunter2").unwrap();
        assert_eq!(blob.mode(), BlobMode::Obfuscated);
        assert_eq!(&*blob.reveal(None).unwrap(), "hunter2");
    }

    #[test]
    fn encrypted_requires_master_key() {
        let key = generate_random_key().unwrap();
        let blob = PasswordBlob::encrypt("s3cret!", &key).unwrap();

        assert!(matches!(
            blob.reveal(None),
            Err(VaultError::DecryptionFailure)
        ));
        assert_eq!(&*blob.reveal(Some(&key)).unwrap(), "s3cret!");
    }

    #[test]
    fn empty_plaintext_becomes_empty_blob() {
        let key = generate_random_key().unwrap();
        assert!(PasswordBlob::obfuscate("").unwrap().is_empty());
        assert!(PasswordBlob::encrypt("", &key).unwrap().is_empty());
        assert_eq!(&*PasswordBlob::empty().reveal(None).unwrap(), "");
    }

    #[test]
    fn upgrade_then_downgrade_preserves_plaintext() {
        let key = generate_random_key().unwrap();
        let mut blob = PasswordBlob::obfuscate("correct horse").unwrap();

        blob.upgrade(&key).unwrap();
        assert_eq!(blob.mode(), BlobMode::Encrypted);
        assert_eq!(&*blob.reveal(Some(&key)).unwrap(), "correct horse");

        blob.downgrade(&key).unwrap();
        assert_eq!(blob.mode(), BlobMode::Obfuscated);
        assert_eq!(&*blob.reveal(None).unwrap(), "correct horse");
    }

    #[test]
    fn upgrade_is_idempotent_on_encrypted_and_empty() {
        let key = generate_random_key().unwrap();
        let mut encrypted = PasswordBlob::encrypt("x1y2z3", &key).unwrap();
        let before = encrypted.clone();
        encrypted.upgrade(&key).unwrap();
        assert_eq!(encrypted, before);

        let mut empty = PasswordBlob::empty();
        empty.upgrade(&key).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn failed_rekey_leaves_blob_intact() {
        let key = generate_random_key().unwrap();
        let wrong = generate_random_key().unwrap();
        let new = generate_random_key().unwrap();

        let mut blob = PasswordBlob::encrypt("keep me", &key).unwrap();
        let before = blob.clone();

        assert!(blob.rekey(&wrong, &new).is_err());
        assert_eq!(blob, before);
        assert_eq!(&*blob.reveal(Some(&key)).unwrap(), "keep me");
    }

    #[test]
    fn reveals_same_goes_through_decryption() {
        let key = generate_random_key().unwrap();
        let a = PasswordBlob::encrypt("same", &key).unwrap();
        let b = PasswordBlob::encrypt("same", &key).unwrap();

        // Random nonces: ciphertexts differ even for equal plaintexts.
        assert_ne!(a.data(), b.data());
        assert!(a.reveals_same(&b, Some(&key)).unwrap());

        let c = PasswordBlob::encrypt("different", &key).unwrap();
        assert!(!a.reveals_same(&c, Some(&key)).unwrap());
    }

    #[test]
    fn unknown_mode_tag_is_corrupt() {
        assert!(matches!(
            PasswordBlob::from_parts(9, vec![1, 2, 3]),
            Err(VaultError::Corrupt(_))
        ));
    }
}
