// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared error and base types for the formvault credential store.

pub mod error;
pub mod types;

pub use error::VaultError;
pub use types::{TriState, WindowId};
