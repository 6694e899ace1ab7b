// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed continuations for operations waiting on the master password.
//!
//! Each variant owns everything needed to replay the operation from the
//! top once the prompt resolves, including the caller's callback. Replay
//! may re-suspend (wrong password), and cancellation must fail each parked
//! callback instead of dropping it silently.

use std::path::PathBuf;

use formvault_core::{TriState, VaultError, WindowId};
use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::manager::{StoreAction, StoreToken};
use crate::record::{DocumentContext, FormPage, FormSnapshot};
use crate::sync::item::SyncItem;
use crate::sync::SyncAction;

/// One filled form field handed back to the host.
pub struct FieldFill {
    pub name: String,
    pub value: Zeroizing<String>,
}

/// Result of a fill request.
pub struct FetchResult {
    pub fills: Vec<FieldFill>,
    /// Whether the host should submit the form after filling.
    pub submit: bool,
}

/// Callback receiving the filled fields (or the failure).
pub type FetchCallback = Box<dyn FnOnce(Result<FetchResult, VaultError>)>;

/// Callback receiving a retrieved login password; `Ok(None)` means no such
/// login is stored.
pub type PasswordCallback = Box<dyn FnOnce(Result<Option<Zeroizing<String>>, VaultError>)>;

/// An operation parked until the outstanding prompt resolves.
pub enum SuspendedOperation {
    /// Find matching pages for a live form and fill it.
    Use {
        doc: DocumentContext,
        form: FormSnapshot,
        submit: TriState,
        matching_username: bool,
        callback: FetchCallback,
    },
    /// Fill a live form from one specific stored page.
    FetchPage {
        doc: DocumentContext,
        form: FormSnapshot,
        page_index: usize,
        submit: TriState,
        matching_username: bool,
        callback: FetchCallback,
    },
    /// Store a page directly, bypassing the offer prompt.
    StorePage {
        page: FormPage,
        window: Option<WindowId>,
    },
    /// Finish a store offer the user already answered.
    ReportAction {
        token: StoreToken,
        action: StoreAction,
        window: Option<WindowId>,
    },
    /// Store or update a server login.
    StoreLogin {
        id: String,
        username: String,
        password: SecretString,
        window: Option<WindowId>,
    },
    /// Retrieve a stored login password.
    RetrievePassword {
        id: String,
        username: String,
        window: Option<WindowId>,
        callback: PasswordCallback,
    },
    /// Switch the encryption regime and re-seal the database.
    ChangeEncryption {
        strong: bool,
        window: Option<WindowId>,
    },
    /// Unlock a strong-encrypted database deferred past startup.
    OpenDatabase { path: PathBuf },
    /// Push dirty records to the sync peer.
    SyncFlush { window: Option<WindowId> },
    /// Apply an incoming sync item that needs the master key to store.
    ApplySync { item: SyncItem, action: SyncAction },
}

impl SuspendedOperation {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SuspendedOperation::Use { .. } => "use",
            SuspendedOperation::FetchPage { .. } => "fetch_page",
            SuspendedOperation::StorePage { .. } => "store_page",
            SuspendedOperation::ReportAction { .. } => "report_action",
            SuspendedOperation::StoreLogin { .. } => "store_login",
            SuspendedOperation::RetrievePassword { .. } => "retrieve_password",
            SuspendedOperation::ChangeEncryption { .. } => "change_encryption",
            SuspendedOperation::OpenDatabase { .. } => "open_database",
            SuspendedOperation::SyncFlush { .. } => "sync_flush",
            SuspendedOperation::ApplySync { .. } => "apply_sync",
        }
    }

    /// Deliver the failure a cancelled operation owes its caller.
    /// Operations without callbacks are simply dropped; regime changes get
    /// their listener notification from the manager.
    pub fn fail(self, err: impl Fn() -> VaultError) {
        match self {
            SuspendedOperation::Use { callback, .. }
            | SuspendedOperation::FetchPage { callback, .. } => callback(Err(err())),
            SuspendedOperation::RetrievePassword { callback, .. } => callback(Err(err())),
            _ => {}
        }
    }
}
