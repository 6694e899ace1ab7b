// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered TOML/env configuration for the formvault credential store.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{FormvaultConfig, VaultConfig, MIN_PASSWORD_LIFETIME_SECS};
