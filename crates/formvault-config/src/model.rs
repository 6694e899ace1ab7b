// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the formvault credential store.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lower bound for the master password lifetime, in seconds.
///
/// Shorter lifetimes would turn every second operation into a prompt.
pub const MIN_PASSWORD_LIFETIME_SECS: u64 = 60;

/// Top-level formvault configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FormvaultConfig {
    /// Credential vault settings.
    #[serde(default)]
    pub vault: VaultConfig,
}

impl FormvaultConfig {
    /// Clamp out-of-range values after extraction.
    ///
    /// The password lifetime floor is enforced here rather than rejected,
    /// so a too-small value degrades to the minimum instead of refusing
    /// to start.
    pub fn validate(mut self) -> Self {
        if self.vault.password_lifetime_secs < MIN_PASSWORD_LIFETIME_SECS {
            warn!(
                configured = self.vault.password_lifetime_secs,
                floor = MIN_PASSWORD_LIFETIME_SECS,
                "vault.password_lifetime_secs below minimum, clamping"
            );
            self.vault.password_lifetime_secs = MIN_PASSWORD_LIFETIME_SECS;
        }
        self
    }
}

/// Credential vault configuration.
///
/// Controls the encryption regime, master password aging, form auto-submit
/// behavior, and the Argon2id key derivation parameters (OWASP-recommended
/// defaults).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Path to the credential database file. `None` uses the XDG data dir.
    #[serde(default)]
    pub path: Option<String>,

    /// Protect secrets with a master password instead of obfuscation only.
    #[serde(default = "default_strong_encryption")]
    pub strong_encryption: bool,

    /// Seconds a verified master password stays usable without re-prompting.
    #[serde(default = "default_password_lifetime_secs")]
    pub password_lifetime_secs: u64,

    /// Submit filled forms automatically when the caller does not say.
    #[serde(default = "default_auto_submit")]
    pub auto_submit: bool,

    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB).
    #[serde(default = "default_kdf_memory_cost")]
    pub kdf_memory_cost: u32,

    /// Argon2id iteration count (default: 3).
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Argon2id parallelism lanes (default: 4).
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: None,
            strong_encryption: default_strong_encryption(),
            password_lifetime_secs: default_password_lifetime_secs(),
            auto_submit: default_auto_submit(),
            kdf_memory_cost: default_kdf_memory_cost(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
        }
    }
}

impl VaultConfig {
    /// Resolve the database path, falling back to the XDG data directory.
    pub fn database_path(&self) -> std::path::PathBuf {
        match &self.path {
            Some(p) => std::path::PathBuf::from(p),
            None => dirs::data_dir()
                .map(|p| p.join("formvault").join("formvault.dat"))
                .unwrap_or_else(|| std::path::PathBuf::from("formvault.dat")),
        }
    }
}

fn default_strong_encryption() -> bool {
    false
}

fn default_password_lifetime_secs() -> u64 {
    300 // 5 minutes
}

fn default_auto_submit() -> bool {
    true
}

fn default_kdf_memory_cost() -> u32 {
    65536 // 64 MiB per OWASP recommendation
}

fn default_kdf_iterations() -> u32 {
    3
}

fn default_kdf_parallelism() -> u32 {
    4
}
