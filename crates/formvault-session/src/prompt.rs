// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt delegation and passphrase acquisition.
//!
//! The store never renders a dialog itself. It hands a [`PromptRequest`] to
//! the registered [`PasswordPrompt`] collaborator and suspends; the host
//! answers later through `password_done`. For headless hosts,
//! [`get_master_passphrase`] reads the passphrase from the
//! `FORMVAULT_MASTER_PASSWORD` environment variable or a TTY.

use formvault_core::{VaultError, WindowId};
use secrecy::SecretString;

/// The environment variable name for providing the master passphrase.
pub const MASTER_PASSWORD_ENV_VAR: &str = "FORMVAULT_MASTER_PASSWORD";

/// What kind of dialog the host should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Ask for the existing master password.
    AskPassword,
    /// First-time setup: choose a new master password.
    NewPassword,
    /// Ask for the existing password and a replacement.
    ChangePassword,
}

/// Why the password is being requested; hosts use this for dialog text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptReason {
    /// A stored secret needs to be decrypted or encrypted.
    Unlock,
    /// The encryption regime is being switched.
    RegimeChange,
    /// Dirty records are being pushed to a sync peer.
    SyncFlush,
    /// A strong-encrypted database is being opened.
    OpenDatabase,
}

/// One password request handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptRequest {
    pub mode: PromptMode,
    pub reason: PromptReason,
    pub window: Option<WindowId>,
}

/// Host collaborator that renders the master password dialog.
///
/// `request_password` is fire-and-forget: the host answers asynchronously
/// by calling `password_done` on the manager. Only one request is
/// outstanding at a time; concurrent needs are compressed into it.
pub trait PasswordPrompt {
    fn request_password(&self, request: PromptRequest);
}

/// Get the master passphrase from the environment or an interactive TTY.
///
/// Priority:
/// 1. `FORMVAULT_MASTER_PASSWORD` environment variable (headless hosts)
/// 2. Interactive TTY prompt via `rpassword`
///
/// Returns an error if neither source is available.
pub fn get_master_passphrase() -> Result<SecretString, VaultError> {
    if let Ok(key) = std::env::var(MASTER_PASSWORD_ENV_VAR)
        && !key.is_empty()
    {
        return Ok(SecretString::from(key));
    }

    if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        eprint!("Master password: ");
        let passphrase = rpassword::read_password()
            .map_err(|e| VaultError::Internal(format!("failed to read passphrase: {e}")))?;
        if passphrase.is_empty() {
            return Err(VaultError::Internal("empty passphrase not allowed".to_string()));
        }
        return Ok(SecretString::from(passphrase));
    }

    Err(VaultError::Internal(
        "No passphrase provided. Set FORMVAULT_MASTER_PASSWORD or run interactively.".to_string(),
    ))
}
