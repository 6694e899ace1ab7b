// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixed obfuscation key.
//!
//! In the default regime every stored string is sealed under this
//! code-embedded key. That defeats casual inspection of the database file
//! and nothing more: anyone with this source can decrypt. Real protection
//! requires the strong-encryption regime, where secrets are sealed under a
//! master-password-derived key instead.

/// 32-byte key baked into the binary for the obfuscation regime.
pub const OBFUSCATION_KEY: [u8; 32] = [
    0x83, 0x7d, 0xfc, 0x0f, 0x8e, 0xb3, 0xe8, 0x69, 0x73, 0xaf, 0xff, 0x06, 0x22, 0x51, 0xc4,
    0x2c, 0x18, 0x9d, 0xb0, 0x4b, 0x35, 0xe2, 0x66, 0x9b, 0x0e, 0x56, 0xa4, 0xd0, 0x7f, 0x61,
    0x38, 0x5a,
];
