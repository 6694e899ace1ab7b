// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./formvault.toml` > `~/.config/formvault/formvault.toml`
//! > `/etc/formvault/formvault.toml` with environment variable overrides via
//! `FORMVAULT_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::FormvaultConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/formvault/formvault.toml` (system-wide)
/// 3. `~/.config/formvault/formvault.toml` (user XDG config)
/// 4. `./formvault.toml` (local directory)
/// 5. `FORMVAULT_*` environment variables
pub fn load_config() -> Result<FormvaultConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FormvaultConfig::default()))
        .merge(Toml::file("/etc/formvault/formvault.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("formvault/formvault.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("formvault.toml"))
        .merge(env_provider())
        .extract()
        .map(FormvaultConfig::validate)
}

/// Load configuration from a TOML string only (no XDG lookup).
///
/// Used for testing and for hosts that supply the config inline.
pub fn load_config_from_str(toml_content: &str) -> Result<FormvaultConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FormvaultConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
        .map(FormvaultConfig::validate)
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FormvaultConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FormvaultConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
        .map(FormvaultConfig::validate)
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `FORMVAULT_VAULT_KDF_MEMORY_COST` must
/// map to `vault.kdf_memory_cost`, not `vault.kdf.memory.cost`.
fn env_provider() -> Env {
    Env::prefixed("FORMVAULT_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str.replacen("vault_", "vault.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MIN_PASSWORD_LIFETIME_SECS;

    #[test]
    fn defaults_extract_cleanly() {
        let config = load_config_from_str("").unwrap();
        assert!(!config.vault.strong_encryption);
        assert_eq!(config.vault.password_lifetime_secs, 300);
        assert!(config.vault.auto_submit);
        assert_eq!(config.vault.kdf_memory_cost, 65536);
    }

    #[test]
    fn vault_section_overrides_defaults() {
        let config = load_config_from_str(
            r#"
            [vault]
            strong_encryption = true
            password_lifetime_secs = 120
            auto_submit = false
            "#,
        )
        .unwrap();
        assert!(config.vault.strong_encryption);
        assert_eq!(config.vault.password_lifetime_secs, 120);
        assert!(!config.vault.auto_submit);
    }

    #[test]
    fn password_lifetime_is_clamped_to_floor() {
        let config = load_config_from_str(
            r#"
            [vault]
            password_lifetime_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(
            config.vault.password_lifetime_secs,
            MIN_PASSWORD_LIFETIME_SECS
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = load_config_from_str(
            r#"
            [vault]
            no_such_key = true
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn explicit_path_wins_over_xdg_fallback() {
        let config = load_config_from_str(
            r#"
            [vault]
            path = "/tmp/creds.dat"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.vault.database_path(),
            std::path::PathBuf::from("/tmp/creds.dat")
        );
    }
}
