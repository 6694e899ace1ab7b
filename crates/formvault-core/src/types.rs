// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the formvault crates.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Opaque identifier of the window requesting an operation.
///
/// Used to anchor master password prompts to the window that triggered
/// them. `None` at call sites means "no window yet" (startup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u64);

/// A caller preference that may defer to configuration.
///
/// `Default` resolves to the configured fallback at the point of use,
/// e.g. the auto-submit setting when filling a form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize, Default,
)]
pub enum TriState {
    Yes,
    No,
    #[default]
    Default,
}

impl TriState {
    /// Resolve to a concrete boolean, using `fallback` for `Default`.
    pub fn resolve(self, fallback: bool) -> bool {
        match self {
            TriState::Yes => true,
            TriState::No => false,
            TriState::Default => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tristate_resolves_explicit_values_regardless_of_fallback() {
        assert!(TriState::Yes.resolve(false));
        assert!(!TriState::No.resolve(true));
    }

    #[test]
    fn tristate_default_uses_fallback() {
        assert!(TriState::Default.resolve(true));
        assert!(!TriState::Default.resolve(false));
    }
}
