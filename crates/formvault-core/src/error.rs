// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the formvault credential store.

use thiserror::Error;

/// The primary error type used across all formvault crates.
///
/// Wrong passwords, decryption failures, policy rejections and user
/// cancellation are ordinary results of operating the store and are
/// modeled as variants rather than panics.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Database file I/O errors (open, read, write, rename).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Cryptographic primitive failures (key setup, nonce generation, KDF).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The supplied master password did not verify against the check code.
    #[error("wrong master password")]
    WrongPassword,

    /// Ciphertext could not be decrypted (wrong key, rotated key, or tampering).
    #[error("decryption failed")]
    DecryptionFailure,

    /// A candidate master password was rejected by the password policy.
    #[error("password rejected by policy: {0}")]
    PolicyRejected(String),

    /// The user cancelled the master password prompt.
    #[error("cancelled by user")]
    Cancelled,

    /// The on-disk database is structurally invalid.
    #[error("corrupt database: {0}")]
    Corrupt(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Storage {
            source: Box::new(err),
        }
    }
}
