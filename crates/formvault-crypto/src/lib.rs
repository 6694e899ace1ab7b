// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives for the formvault credential store.
//!
//! Two at-rest regimes share one code path: obfuscation (a fixed,
//! code-embedded key that only defeats casual file inspection) and strong
//! encryption (a master-password-derived key via Argon2id). [`PasswordBlob`]
//! carries a secret in either regime and converts between them atomically.
//!
//! Sync payloads use a separate 128-bit key and base64 transport encoding.

pub mod aead;
pub mod blob;
pub mod kdf;
pub mod obfuscate;

pub use aead::{
    fill_random, generate_random_key, open_blob, open_blob_b64, seal_blob, seal_blob_b64,
};
pub use blob::{BlobMode, PasswordBlob};
pub use kdf::{derive_key, derive_key_with_context, generate_salt, KdfParams};
pub use obfuscate::OBFUSCATION_KEY;
