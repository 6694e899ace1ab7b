// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The credential store root object.
//!
//! [`VaultManager`] owns the records, the security gate, the suspended
//! operation queue, the listener registry and the sync plumbing. All entry
//! points run synchronously on one thread; anything that needs a master
//! password while the prompt is pending parks itself in the queue and is
//! replayed in FIFO order when the host answers via [`VaultManager::password_done`].
//!
//! Every mutating operation persists the full database before reporting
//! success. A persist failure is returned to the caller, but the in-memory
//! state stays authoritative so the next successful persist writes the
//! intended contents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use formvault_config::FormvaultConfig;
use formvault_core::{TriState, VaultError, WindowId};
use formvault_crypto::PasswordBlob;
use formvault_session::{
    Acquire, MasterGate, MasterPasswordHandler, PasswordPrompt, PromptMode, PromptOutcome,
    PromptReason, SecurityGuard, SuspendedQueue,
};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::format::{self, Database};
use crate::listener::{MatchSummary, VaultListener};
use crate::record::{
    normalize_url, server_of, DocumentContext, FieldRecord, FormPage, FormSnapshot, ServerLogin,
};
use crate::suspend::{FetchCallback, FetchResult, FieldFill, PasswordCallback, SuspendedOperation};
use crate::sync::item::{
    build_login_item, build_page_item, decrypt_item, login_from_item, page_from_item,
    try_decrypt_field, ItemKind, PlainItem, SyncItem,
};
use crate::sync::resolver::{resolve_conflict, ConflictWinner};
use crate::sync::status::SyncStatus;
use crate::sync::{SyncAction, SyncEvent, SyncTransport};
use zeroize::Zeroizing;

/// Handle identifying a pending prompt (store offer or match chooser).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreToken(pub u64);

/// The user's answer to a store offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    Store,
    StoreEntireServer,
    NeverOnThisPage,
    NeverOnEntireServer,
    Dismiss,
}

/// What happened to a submitted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The form does not qualify (not exactly one password field, or no
    /// listener took the prompt).
    NotOffered,
    /// An identical page is already stored.
    AlreadyStored,
    /// The user said never to store here.
    Declined,
    /// The offer prompt is showing; answer via `report_store_action`.
    Offered(StoreToken),
}

struct PendingSelect {
    doc: DocumentContext,
    form: FormSnapshot,
    matches: Vec<usize>,
    submit: TriState,
    matching_username: bool,
    callback: FetchCallback,
}

/// Root object of the credential store.
pub struct VaultManager {
    auto_submit: bool,
    path: PathBuf,
    gate: MasterGate,
    queue: SuspendedQueue<SuspendedOperation>,
    pages: Vec<FormPage>,
    logins: Vec<ServerLogin>,
    listeners: Vec<Rc<dyn VaultListener>>,
    pending_stores: HashMap<u64, FormPage>,
    pending_selects: HashMap<u64, PendingSelect>,
    next_token: u64,
    sync_key: Option<Zeroizing<[u8; 16]>>,
    transport: Option<Rc<dyn SyncTransport>>,
    /// Set while an incoming sync item is being applied so the application
    /// does not echo back to the peer.
    sync_blocked: bool,
}

impl VaultManager {
    pub fn new(config: &FormvaultConfig) -> Result<Self, VaultError> {
        let path = config.vault.database_path();
        let mut handler = MasterPasswordHandler::new(&config.vault);
        handler.load_state(&auth_state_path(&path))?;
        let gate = MasterGate::new(handler, config.vault.strong_encryption);
        Ok(Self {
            auto_submit: config.vault.auto_submit,
            path,
            gate,
            queue: SuspendedQueue::new(),
            pages: Vec::new(),
            logins: Vec::new(),
            listeners: Vec::new(),
            pending_stores: HashMap::new(),
            pending_selects: HashMap::new(),
            next_token: 0,
            sync_key: None,
            transport: None,
            sync_blocked: false,
        })
    }

    pub fn register_listener(&mut self, listener: Rc<dyn VaultListener>) {
        self.listeners.push(listener);
    }

    pub fn set_prompt(&self, prompt: Rc<dyn PasswordPrompt>) {
        self.gate.with_handler(|h| h.set_prompt(prompt));
    }

    /// Install the dedicated sync key (handed in out-of-band, never
    /// persisted).
    pub fn set_sync_key(&mut self, key: [u8; 16]) {
        self.sync_key = Some(Zeroizing::new(key));
    }

    pub fn clear_sync_key(&mut self) {
        self.sync_key = None;
    }

    pub fn set_sync_transport(&mut self, transport: Rc<dyn SyncTransport>) {
        self.transport = Some(transport);
    }

    pub fn is_strong(&self) -> bool {
        self.gate.is_strong()
    }

    pub fn pages(&self) -> &[FormPage] {
        &self.pages
    }

    pub fn logins(&self) -> &[ServerLogin] {
        &self.logins
    }

    pub fn suspended_count(&self) -> usize {
        self.queue.len()
    }

    /// Load the database file.
    ///
    /// A missing file starts an empty database in the configured regime. A
    /// corrupt file is backed up to `<path>.save` and replaced by an empty
    /// database rather than refusing to start. Opening a strong-encrypted
    /// database during startup defers the unlock until [`Self::run_deferred`]
    /// so no prompt appears before the host has a window.
    pub fn open(&mut self, during_startup: bool) -> Result<(), VaultError> {
        if self.path.exists() {
            match format::load(&self.path) {
                Ok(db) => {
                    self.gate.set_strong(db.strong);
                    self.pages = db.pages;
                    self.logins = db.logins;
                    info!(
                        pages = self.pages.len(),
                        logins = self.logins.len(),
                        strong = db.strong,
                        "database opened"
                    );
                }
                Err(VaultError::Corrupt(msg)) => {
                    let backup = backup_path(&self.path);
                    warn!(%msg, backup = %backup.display(), "corrupt database, starting fresh");
                    std::fs::rename(&self.path, &backup)?;
                    self.pages.clear();
                    self.logins.clear();
                }
                Err(e) => return Err(e),
            }
        }

        if self.gate.is_strong() {
            if during_startup {
                debug!("deferring strong database unlock past startup");
                self.queue.push(SuspendedOperation::OpenDatabase {
                    path: self.path.clone(),
                });
            } else if let Acquire::Pending =
                self.gate.acquire(None, false, PromptReason::OpenDatabase)?
            {
                self.queue.push(SuspendedOperation::OpenDatabase {
                    path: self.path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Replay operations deferred during startup (the host calls this once
    /// a window exists and prompts may be shown).
    pub fn run_deferred(&mut self) {
        self.replay_suspended();
    }

    // --- Form filling ---

    /// Find stored pages matching a live form and fill it.
    ///
    /// Zero matches calls back with an empty result. One match fills
    /// directly. Several matches raise the chooser via `on_select_match`;
    /// the host answers with [`Self::select_match`]. With
    /// `matching_username` set, only pages whose detected username equals
    /// the form's current username value qualify.
    pub fn use_vault(
        &mut self,
        doc: DocumentContext,
        form: FormSnapshot,
        submit: TriState,
        matching_username: bool,
        callback: FetchCallback,
    ) -> Result<(), VaultError> {
        // Park the whole request while a prompt is up so the chooser never
        // appears behind a password dialog.
        if self.gate.prompt_outstanding() {
            self.queue.push(SuspendedOperation::Use {
                doc,
                form,
                submit,
                matching_username,
                callback,
            });
            return Ok(());
        }

        let matches: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                !p.never_on_this_page
                    && !p.fields.is_empty()
                    && p.matches_document(&doc)
                    && (!matching_username || username_matches(p, &form))
            })
            .map(|(i, _)| i)
            .collect();

        match matches.len() {
            0 => {
                callback(Ok(FetchResult {
                    fills: Vec::new(),
                    submit: false,
                }));
                Ok(())
            }
            1 => self.fetch_page(doc, form, matches[0], submit, matching_username, callback),
            _ => {
                let mut summaries = Vec::with_capacity(matches.len());
                for &index in &matches {
                    summaries.push(MatchSummary {
                        page_index: index,
                        username: self.pages[index].username_hint().unwrap_or_default(),
                    });
                }
                let token = self.next_token();
                self.pending_selects.insert(
                    token,
                    PendingSelect {
                        doc,
                        form,
                        matches,
                        submit,
                        matching_username,
                        callback,
                    },
                );
                if !self.notify_select(StoreToken(token), &summaries) {
                    // Nobody can show a chooser; report nothing filled.
                    if let Some(pending) = self.pending_selects.remove(&token) {
                        (pending.callback)(Ok(FetchResult {
                            fills: Vec::new(),
                            submit: false,
                        }));
                    }
                }
                Ok(())
            }
        }
    }

    /// Answer the multiple-match chooser.
    pub fn select_match(
        &mut self,
        token: StoreToken,
        page_index: usize,
        submit: TriState,
    ) -> Result<(), VaultError> {
        let pending = self
            .pending_selects
            .remove(&token.0)
            .ok_or_else(|| VaultError::Internal("unknown select token".to_string()))?;
        if !pending.matches.contains(&page_index) {
            return Err(VaultError::Internal(
                "selected page was not offered".to_string(),
            ));
        }
        let effective = if submit == TriState::Default {
            pending.submit
        } else {
            submit
        };
        self.fetch_page(
            pending.doc,
            pending.form,
            page_index,
            effective,
            pending.matching_username,
            pending.callback,
        )
    }

    /// Fill a live form from one stored page.
    pub fn fetch_page(
        &mut self,
        doc: DocumentContext,
        form: FormSnapshot,
        page_index: usize,
        submit: TriState,
        matching_username: bool,
        callback: FetchCallback,
    ) -> Result<(), VaultError> {
        match self.gate.acquire(doc.window, false, PromptReason::Unlock)? {
            Acquire::Pending => {
                self.queue.push(SuspendedOperation::FetchPage {
                    doc,
                    form,
                    page_index,
                    submit,
                    matching_username,
                    callback,
                });
                Ok(())
            }
            Acquire::Ready(guard) => {
                let result =
                    self.fill_from_page(&guard, &doc, &form, page_index, submit, matching_username);
                callback(result);
                Ok(())
            }
        }
    }

    fn fill_from_page(
        &self,
        guard: &SecurityGuard,
        doc: &DocumentContext,
        form: &FormSnapshot,
        page_index: usize,
        submit: TriState,
        matching_username: bool,
    ) -> Result<FetchResult, VaultError> {
        let page = self
            .pages
            .get(page_index)
            .ok_or_else(|| VaultError::Internal("stored page index out of range".to_string()))?;
        if !page.matches_document(doc) {
            return Err(VaultError::Internal(
                "stored page does not match requesting document".to_string(),
            ));
        }
        if matching_username && !username_matches(page, form) {
            return Ok(FetchResult {
                fills: Vec::new(),
                submit: false,
            });
        }

        let key = guard.master_key();
        let username_index = page.best_username_field();
        let mut fills = Vec::new();
        for live in &form.fields {
            let Some(index) = page.fields.iter().position(|f| f.name == live.name) else {
                continue;
            };
            let stored = &page.fields[index];
            if stored.value.is_empty() {
                continue;
            }
            let is_username = stored.is_guessed_username || username_index == Some(index);
            // Never overwrite what the user typed, except the username
            // field (filling a better-known username is expected).
            if live.user_edited && !is_username {
                continue;
            }
            let value = stored.value.reveal(key.as_deref())?;
            fills.push(FieldFill {
                name: live.name.clone(),
                value,
            });
        }

        let submit = submit.resolve(self.auto_submit) && !fills.is_empty();
        Ok(FetchResult { fills, submit })
    }

    // --- Storing form pages ---

    /// Offer to store a submitted form.
    ///
    /// Offers only when the form carries exactly one non-empty password
    /// field, the page is not marked never-store, and an identical page is
    /// not already stored.
    pub fn submit_page(
        &mut self,
        doc: &DocumentContext,
        form: &FormSnapshot,
    ) -> Result<SubmitOutcome, VaultError> {
        if self
            .pages
            .iter()
            .any(|p| p.never_on_this_page && p.matches_document(doc))
        {
            debug!(url = %doc.url, "page is marked never-store");
            return Ok(SubmitOutcome::Declined);
        }

        let password_fields = form
            .fields
            .iter()
            .filter(|f| f.is_password && !f.value.is_empty())
            .count();
        if password_fields != 1 {
            return Ok(SubmitOutcome::NotOffered);
        }

        if self
            .pages
            .iter()
            .any(|p| p.matches_document(doc) && p.matches_form(form) && page_matches_snapshot(p, form))
        {
            return Ok(SubmitOutcome::AlreadyStored);
        }

        let candidate = page_from_snapshot(doc, form)?;
        let token = self.next_token();
        self.pending_stores.insert(token, candidate.clone());
        if !self.notify_submit(StoreToken(token), &candidate) {
            self.pending_stores.remove(&token);
            return Ok(SubmitOutcome::NotOffered);
        }
        Ok(SubmitOutcome::Offered(StoreToken(token)))
    }

    /// Apply the user's answer to a store offer.
    pub fn report_store_action(
        &mut self,
        token: StoreToken,
        action: StoreAction,
        window: Option<WindowId>,
    ) -> Result<(), VaultError> {
        let mut page = self
            .pending_stores
            .remove(&token.0)
            .ok_or_else(|| VaultError::Internal("unknown store token".to_string()))?;

        match action {
            StoreAction::Dismiss => Ok(()),
            StoreAction::NeverOnThisPage | StoreAction::NeverOnEntireServer => {
                // A never-store page keeps only the policy flag.
                page.fields.clear();
                page.never_on_this_page = true;
                if action == StoreAction::NeverOnEntireServer {
                    page.on_this_server = true;
                    if let Some(server) = server_of(&page.url).map(str::to_string) {
                        page.url = server;
                    }
                }
                self.insert_page(page)
            }
            StoreAction::Store | StoreAction::StoreEntireServer => {
                if action == StoreAction::StoreEntireServer {
                    page.on_this_server = true;
                }
                match self.gate.acquire(window, false, PromptReason::Unlock)? {
                    Acquire::Pending => {
                        self.pending_stores.insert(token.0, page);
                        self.queue.push(SuspendedOperation::ReportAction {
                            token,
                            action,
                            window,
                        });
                        Ok(())
                    }
                    Acquire::Ready(guard) => {
                        if self.gate.is_strong() {
                            let key = guard.master_key().ok_or(VaultError::DecryptionFailure)?;
                            for field in &mut page.fields {
                                if field.is_password {
                                    field.value.upgrade(&key)?;
                                }
                            }
                        }
                        self.insert_page(page)
                    }
                }
            }
        }
    }

    /// Store a page directly, bypassing the offer prompt.
    pub fn store_page(
        &mut self,
        window: Option<WindowId>,
        doc: &DocumentContext,
        form: &FormSnapshot,
    ) -> Result<(), VaultError> {
        let page = page_from_snapshot(doc, form)?;
        self.store_page_record(window, page)
    }

    fn store_page_record(
        &mut self,
        window: Option<WindowId>,
        mut page: FormPage,
    ) -> Result<(), VaultError> {
        match self.gate.acquire(window, false, PromptReason::Unlock)? {
            Acquire::Pending => {
                self.queue
                    .push(SuspendedOperation::StorePage { page, window });
                Ok(())
            }
            Acquire::Ready(guard) => {
                if self.gate.is_strong() {
                    let key = guard.master_key().ok_or(VaultError::DecryptionFailure)?;
                    for field in &mut page.fields {
                        if field.is_password {
                            field.value.upgrade(&key)?;
                        }
                    }
                }
                self.insert_page(page)
            }
        }
    }

    /// Add a page, or update the page with the same identity in place.
    /// Identity includes the detected username, so two accounts on the same
    /// form are kept as separate pages.
    fn insert_page(&mut self, mut page: FormPage) -> Result<(), VaultError> {
        let username = page.username_hint().unwrap_or_default();
        let existing = self.pages.iter().position(|p| {
            p.url == page.url
                && p.top_url == page.top_url
                && p.action_url == page.action_url
                && p.submit_name == page.submit_name
                && p.form_number == page.form_number
                && p.username_hint().unwrap_or_default() == username
        });
        let index = match existing {
            Some(index) => {
                // Keep the sync identity of the record being replaced.
                let mut sync = self.pages[index].sync.clone();
                sync.touch();
                page.sync = sync;
                self.pages[index] = page;
                index
            }
            None => {
                self.pages.push(page);
                self.pages.len() - 1
            }
        };
        self.persist()?;
        let stored = self.pages[index].clone();
        self.notify_page_added(&stored);
        Ok(())
    }

    /// Delete one stored page.
    pub fn delete_page(&mut self, index: usize) -> Result<(), VaultError> {
        if index >= self.pages.len() {
            return Err(VaultError::Internal("page index out of range".to_string()));
        }
        let page = self.pages.remove(index);
        self.emit_delete(ItemKind::FormPage, &page.sync.id, page.sync.status);
        self.persist()?;
        self.notify_page_removed(&page);
        Ok(())
    }

    // --- Server logins ---

    /// Store a login, or update its password if one exists for
    /// `(id, username)`.
    pub fn store_login(
        &mut self,
        window: Option<WindowId>,
        id: &str,
        username: &str,
        password: SecretString,
    ) -> Result<(), VaultError> {
        match self.gate.acquire(window, false, PromptReason::Unlock)? {
            Acquire::Pending => {
                self.queue.push(SuspendedOperation::StoreLogin {
                    id: id.to_string(),
                    username: username.to_string(),
                    password,
                    window,
                });
                Ok(())
            }
            Acquire::Ready(guard) => self.store_login_with(&guard, id, username, &password),
        }
    }

    fn store_login_with(
        &mut self,
        guard: &SecurityGuard,
        id: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<(), VaultError> {
        let key = guard.master_key();
        let plaintext = password.expose_secret();

        if let Some(index) = self
            .logins
            .iter()
            .position(|l| l.id == id && l.username == username)
        {
            let current = self.logins[index].password.reveal(key.as_deref())?;
            if *current == *plaintext {
                return Ok(());
            }
            self.logins[index].password = self.seal_per_regime(plaintext, key.as_deref())?;
            self.logins[index].sync.touch();
            self.persist()?;
            let updated = self.logins[index].clone();
            self.notify_login_added(&updated);
            return Ok(());
        }

        let login = ServerLogin {
            id: id.to_string(),
            username: username.to_string(),
            password: self.seal_per_regime(plaintext, key.as_deref())?,
            sync: crate::sync::status::SyncRecord::new_local(),
        };
        self.logins.push(login.clone());
        self.persist()?;
        self.notify_login_added(&login);
        Ok(())
    }

    /// Retrieve a stored login password asynchronously.
    ///
    /// An empty `username` matches any username for the id. Ids stored with
    /// a `*` prefix match by server.
    pub fn login_password(
        &mut self,
        window: Option<WindowId>,
        id: &str,
        username: &str,
        callback: PasswordCallback,
    ) -> Result<(), VaultError> {
        match self.gate.acquire(window, false, PromptReason::Unlock)? {
            Acquire::Pending => {
                self.queue.push(SuspendedOperation::RetrievePassword {
                    id: id.to_string(),
                    username: username.to_string(),
                    window,
                    callback,
                });
                Ok(())
            }
            Acquire::Ready(guard) => {
                let key = guard.master_key();
                let result = match self.find_login(id, username) {
                    Some(login) => login.password.reveal(key.as_deref()).map(Some),
                    None => Ok(None),
                };
                callback(result);
                Ok(())
            }
        }
    }

    /// Look up a stored login without touching its password. An empty
    /// `username` matches any username for the id.
    pub fn find_login(&self, id: &str, username: &str) -> Option<&ServerLogin> {
        self.logins
            .iter()
            .find(|l| l.matches_id(id) && (username.is_empty() || l.username == username))
    }

    /// Remove a login. Returns whether one was found.
    pub fn delete_login(&mut self, id: &str, username: &str) -> Result<bool, VaultError> {
        let Some(index) = self
            .logins
            .iter()
            .position(|l| l.id == id && (username.is_empty() || l.username == username))
        else {
            return Ok(false);
        };
        let login = self.logins.remove(index);
        self.emit_delete(ItemKind::Login, &login.sync.id, login.sync.status);
        self.persist()?;
        self.notify_login_removed(&login);
        Ok(true)
    }

    /// Remove everything. Internal (`local:`-prefixed) logins survive when
    /// `keep_internal` is set.
    pub fn clear_all(&mut self, keep_internal: bool) -> Result<(), VaultError> {
        let pages = std::mem::take(&mut self.pages);
        for page in &pages {
            self.emit_delete(ItemKind::FormPage, &page.sync.id, page.sync.status);
        }

        let logins = std::mem::take(&mut self.logins);
        let mut removed_logins = Vec::new();
        for login in logins {
            if keep_internal && login.is_internal() {
                self.logins.push(login);
            } else {
                self.emit_delete(ItemKind::Login, &login.sync.id, login.sync.status);
                removed_logins.push(login);
            }
        }

        self.persist()?;
        for page in &pages {
            self.notify_page_removed(page);
        }
        for login in &removed_logins {
            self.notify_login_removed(login);
        }
        info!(
            pages = pages.len(),
            logins = removed_logins.len(),
            "database cleared"
        );
        Ok(())
    }

    // --- Encryption regime ---

    /// Switch between the obfuscated and strong-encrypted regimes,
    /// re-sealing every stored password.
    pub fn update_security_state(
        &mut self,
        window: Option<WindowId>,
        strong: bool,
    ) -> Result<(), VaultError> {
        if strong == self.gate.is_strong() {
            return Ok(());
        }
        match self.gate.acquire(window, true, PromptReason::RegimeChange)? {
            Acquire::Pending => {
                self.queue
                    .push(SuspendedOperation::ChangeEncryption { strong, window });
                Ok(())
            }
            Acquire::Ready(guard) => self.apply_regime_change(strong, &guard),
        }
    }

    fn apply_regime_change(
        &mut self,
        strong: bool,
        guard: &SecurityGuard,
    ) -> Result<(), VaultError> {
        let key = guard.master_key().ok_or(VaultError::DecryptionFailure)?;

        // Two-phase: convert clones in full before replacing anything, so a
        // failure cannot leave the store half-converted.
        let mut new_pages = self.pages.clone();
        let mut new_logins = self.logins.clone();
        let converted = (|| -> Result<(), VaultError> {
            for page in &mut new_pages {
                for field in &mut page.fields {
                    if field.is_password {
                        if strong {
                            field.value.upgrade(&key)?;
                        } else {
                            field.value.downgrade(&key)?;
                        }
                    }
                }
            }
            for login in &mut new_logins {
                if strong {
                    login.password.upgrade(&key)?;
                } else {
                    login.password.downgrade(&key)?;
                }
            }
            Ok(())
        })();

        match converted {
            Ok(()) => {
                self.pages = new_pages;
                self.logins = new_logins;
                self.gate.set_strong(strong);
                if !strong {
                    self.gate.with_handler(|h| h.forget_master_password());
                }
                let persisted = self.persist();
                info!(strong, "encryption regime changed");
                self.notify_security(true, true, strong);
                persisted
            }
            Err(e) => {
                warn!(error = %e, "regime change failed, store left untouched");
                self.notify_security(false, false, self.gate.is_strong());
                Err(e)
            }
        }
    }

    /// Drop the cached master key so the next protected operation
    /// re-prompts (the host's explicit lock action).
    pub fn forget_master_password(&self) {
        self.gate.with_handler(|h| h.forget_master_password());
    }

    /// Start the change-master-password flow. The re-seal happens inside
    /// [`Self::password_done`] once both passwords are known.
    pub fn change_master_password(
        &mut self,
        window: Option<WindowId>,
    ) -> Result<(), VaultError> {
        if !self.gate.with_handler(|h| h.has_master_password()) {
            return Err(VaultError::Internal(
                "no master password to change".to_string(),
            ));
        }
        self.gate.with_handler(|h| {
            h.retrieve_master_password(
                PromptMode::ChangePassword,
                PromptReason::RegimeChange,
                window,
            )
        })?;
        Ok(())
    }

    // --- Prompt resolution and replay ---

    /// The host's answer to the outstanding master password prompt.
    ///
    /// Success and a changed password replay the suspended queue. A wrong
    /// password also replays it: each operation re-acquires, finds no key,
    /// re-suspends and thereby re-prompts. Cancellation fails every queued
    /// operation.
    pub fn password_done(
        &mut self,
        ok: bool,
        old: &SecretString,
        new: &SecretString,
    ) -> Result<(), VaultError> {
        match self.gate.password_done(ok, old, new)? {
            PromptOutcome::Success => {
                self.replay_suspended();
                Ok(())
            }
            PromptOutcome::WrongPassword => {
                debug!("wrong master password, replaying so operations re-prompt");
                self.replay_suspended();
                Ok(())
            }
            PromptOutcome::Cancelled => {
                self.cancel_suspended();
                Ok(())
            }
            PromptOutcome::Changed { old_key, new_key } => {
                self.rekey_all(&old_key, &new_key)?;
                self.replay_suspended();
                Ok(())
            }
        }
    }

    fn rekey_all(&mut self, old_key: &[u8; 32], new_key: &[u8; 32]) -> Result<(), VaultError> {
        let mut new_pages = self.pages.clone();
        let mut new_logins = self.logins.clone();
        for page in &mut new_pages {
            for field in &mut page.fields {
                field.value.rekey(old_key, new_key)?;
            }
        }
        for login in &mut new_logins {
            login.password.rekey(old_key, new_key)?;
        }
        self.pages = new_pages;
        self.logins = new_logins;
        info!("stored secrets re-sealed under the new master password");
        self.persist()
    }

    fn replay_suspended(&mut self) {
        let batch = self.queue.take_batch();
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "replaying suspended operations");
        for op in batch {
            let kind = op.kind();
            if let Err(e) = self.resume(op) {
                warn!(kind, error = %e, "suspended operation failed on replay");
            }
        }
    }

    fn resume(&mut self, op: SuspendedOperation) -> Result<(), VaultError> {
        match op {
            SuspendedOperation::Use {
                doc,
                form,
                submit,
                matching_username,
                callback,
            } => self.use_vault(doc, form, submit, matching_username, callback),
            SuspendedOperation::FetchPage {
                doc,
                form,
                page_index,
                submit,
                matching_username,
                callback,
            } => self.fetch_page(doc, form, page_index, submit, matching_username, callback),
            SuspendedOperation::StorePage { page, window } => {
                self.store_page_record(window, page)
            }
            SuspendedOperation::ReportAction {
                token,
                action,
                window,
            } => self.report_store_action(token, action, window),
            SuspendedOperation::StoreLogin {
                id,
                username,
                password,
                window,
            } => self.store_login(window, &id, &username, password),
            SuspendedOperation::RetrievePassword {
                id,
                username,
                window,
                callback,
            } => self.login_password(window, &id, &username, callback),
            SuspendedOperation::ChangeEncryption { strong, window } => {
                self.update_security_state(window, strong)
            }
            SuspendedOperation::OpenDatabase { path } => {
                match self.gate.acquire(None, false, PromptReason::OpenDatabase)? {
                    Acquire::Ready(_) => {
                        debug!(path = %path.display(), "deferred database unlock completed");
                        Ok(())
                    }
                    Acquire::Pending => {
                        self.queue.push(SuspendedOperation::OpenDatabase { path });
                        Ok(())
                    }
                }
            }
            SuspendedOperation::SyncFlush { window } => self.sync_flush(window),
            SuspendedOperation::ApplySync { item, action } => self.apply_sync_item(item, action),
        }
    }

    fn cancel_suspended(&mut self) {
        let batch = self.queue.take_batch();
        if batch.is_empty() {
            return;
        }
        info!(count = batch.len(), "cancelling suspended operations");
        for op in batch {
            match op {
                SuspendedOperation::ChangeEncryption { .. } => {
                    self.notify_security(false, false, self.gate.is_strong());
                }
                SuspendedOperation::ReportAction { token, .. } => {
                    self.pending_stores.remove(&token.0);
                }
                other => other.fail(|| VaultError::Cancelled),
            }
        }
    }

    // --- Sync ---

    /// Push every `Add`/`Modify` record to the sync peer and mark it synced.
    pub fn sync_flush(&mut self, window: Option<WindowId>) -> Result<(), VaultError> {
        let Some(transport) = self.transport.clone() else {
            debug!("no sync transport registered, flush skipped");
            return Ok(());
        };
        let Some(sync_key) = self.sync_key.clone() else {
            debug!("no sync key installed, flush skipped");
            return Ok(());
        };

        match self.gate.acquire(window, false, PromptReason::SyncFlush)? {
            Acquire::Pending => {
                self.queue.push(SuspendedOperation::SyncFlush { window });
                Ok(())
            }
            Acquire::Ready(guard) => {
                let key = guard.master_key();
                let mut pushed = 0usize;
                for login in &mut self.logins {
                    if matches!(login.sync.status, SyncStatus::Add | SyncStatus::Modify) {
                        let item = build_login_item(login, key.as_deref(), &sync_key)?;
                        transport.send(SyncEvent::Upsert(item));
                        login.sync.mark_synced();
                        pushed += 1;
                    }
                }
                for page in &mut self.pages {
                    if matches!(page.sync.status, SyncStatus::Add | SyncStatus::Modify) {
                        let item = build_page_item(page, key.as_deref(), &sync_key)?;
                        transport.send(SyncEvent::Upsert(item));
                        page.sync.mark_synced();
                        pushed += 1;
                    }
                }
                debug!(pushed, "sync flush complete");
                self.persist()
            }
        }
    }

    /// Apply one incoming item from the sync peer.
    pub fn apply_sync_item(
        &mut self,
        item: SyncItem,
        action: SyncAction,
    ) -> Result<(), VaultError> {
        if action == SyncAction::Delete {
            return self.apply_sync_delete(&item);
        }

        let Some(sync_key) = self.sync_key.clone() else {
            return Err(VaultError::Internal("no sync key installed".to_string()));
        };

        match self.gate.acquire(None, false, PromptReason::SyncFlush)? {
            Acquire::Pending => {
                self.queue
                    .push(SuspendedOperation::ApplySync { item, action });
                Ok(())
            }
            Acquire::Ready(guard) => {
                let key = guard.master_key();
                self.sync_blocked = true;
                let result = self.apply_sync_upsert(item, &sync_key, key.as_deref());
                self.sync_blocked = false;
                result
            }
        }
    }

    fn apply_sync_delete(&mut self, item: &SyncItem) -> Result<(), VaultError> {
        self.sync_blocked = true;
        let result = (|| {
            match item.kind {
                ItemKind::Login => {
                    if let Some(index) =
                        self.logins.iter().position(|l| l.sync.id == item.id)
                    {
                        let login = self.logins.remove(index);
                        self.persist()?;
                        self.notify_login_removed(&login);
                    }
                }
                ItemKind::FormPage => {
                    if let Some(index) = self.pages.iter().position(|p| p.sync.id == item.id) {
                        let page = self.pages.remove(index);
                        self.persist()?;
                        self.notify_page_removed(&page);
                    }
                }
            }
            Ok(())
        })();
        self.sync_blocked = false;
        result
    }

    fn apply_sync_upsert(
        &mut self,
        item: SyncItem,
        sync_key: &[u8; 16],
        master_key: Option<&[u8; 32]>,
    ) -> Result<(), VaultError> {
        let plain = match decrypt_item(&item, sync_key) {
            Ok(plain) => plain,
            Err(VaultError::DecryptionFailure) => {
                return self.repair_undecryptable(&item, sync_key, master_key);
            }
            Err(e) => return Err(e),
        };
        match item.kind {
            ItemKind::Login => self.apply_incoming_login(&item, &plain, master_key),
            ItemKind::FormPage => self.apply_incoming_page(&item, &plain, master_key),
        }
    }

    fn apply_incoming_login(
        &mut self,
        item: &SyncItem,
        plain: &PlainItem,
        master_key: Option<&[u8; 32]>,
    ) -> Result<(), VaultError> {
        let incoming = login_from_item(item, plain, self.gate.is_strong(), master_key)?;

        // Same sync id: the peer is authoritative for its own record.
        if let Some(index) = self.logins.iter().position(|l| l.sync.id == item.id) {
            self.logins[index] = incoming;
            self.persist()?;
            let updated = self.logins[index].clone();
            self.notify_login_added(&updated);
            return Ok(());
        }

        // Same logical login under a different sync id: resolve the
        // conflict deterministically and delete the losing id.
        if let Some(index) = self
            .logins
            .iter()
            .position(|l| l.id == incoming.id && l.username == incoming.username)
        {
            let local = &self.logins[index];
            match resolve_conflict(local.sync.modified, &local.sync.id, item.modified, &item.id) {
                ConflictWinner::Incoming => {
                    let old = std::mem::replace(&mut self.logins[index], incoming);
                    if old.sync.status.emits_delete() {
                        self.send_event(SyncEvent::Delete {
                            kind: ItemKind::Login,
                            id: old.sync.id.clone(),
                        });
                    }
                    self.persist()?;
                    let updated = self.logins[index].clone();
                    self.notify_login_added(&updated);
                }
                ConflictWinner::Local => {
                    // The peer sent the losing copy; tell it to drop it.
                    self.send_event(SyncEvent::Delete {
                        kind: ItemKind::Login,
                        id: item.id.clone(),
                    });
                }
            }
            return Ok(());
        }

        self.logins.push(incoming.clone());
        self.persist()?;
        self.notify_login_added(&incoming);
        Ok(())
    }

    fn apply_incoming_page(
        &mut self,
        item: &SyncItem,
        plain: &PlainItem,
        master_key: Option<&[u8; 32]>,
    ) -> Result<(), VaultError> {
        let incoming = page_from_item(item, plain, self.gate.is_strong(), master_key)?;

        if let Some(index) = self.pages.iter().position(|p| p.sync.id == item.id) {
            self.pages[index] = incoming;
            self.persist()?;
            let updated = self.pages[index].clone();
            self.notify_page_added(&updated);
            return Ok(());
        }

        if let Some(index) = self.pages.iter().position(|p| {
            p.url == incoming.url
                && p.action_url == incoming.action_url
                && p.submit_name == incoming.submit_name
                && p.form_number == incoming.form_number
        }) {
            let local = &self.pages[index];
            match resolve_conflict(local.sync.modified, &local.sync.id, item.modified, &item.id) {
                ConflictWinner::Incoming => {
                    let old = std::mem::replace(&mut self.pages[index], incoming);
                    if old.sync.status.emits_delete() {
                        self.send_event(SyncEvent::Delete {
                            kind: ItemKind::FormPage,
                            id: old.sync.id.clone(),
                        });
                    }
                    self.persist()?;
                    let updated = self.pages[index].clone();
                    self.notify_page_added(&updated);
                }
                ConflictWinner::Local => {
                    self.send_event(SyncEvent::Delete {
                        kind: ItemKind::FormPage,
                        id: item.id.clone(),
                    });
                }
            }
            return Ok(());
        }

        self.pages.push(incoming.clone());
        self.persist()?;
        self.notify_page_added(&incoming);
        Ok(())
    }

    /// Incoming item cannot be decrypted (rotated or wrong sync key):
    /// re-upload our copy under a fresh sync id and delete the broken
    /// remote record.
    fn repair_undecryptable(
        &mut self,
        item: &SyncItem,
        sync_key: &[u8; 16],
        master_key: Option<&[u8; 32]>,
    ) -> Result<(), VaultError> {
        warn!(id = %item.id, kind = %item.kind, "incoming sync item failed decryption, repairing");

        // Locate our counterpart: by sync id first, then by whatever
        // identity survives partial decryption (key rotation usually breaks
        // only the re-encrypted fields).
        let logical_id = try_decrypt_field(sync_key, &item.page_url);
        let rebuilt = match item.kind {
            ItemKind::Login => {
                let index = self
                    .logins
                    .iter()
                    .position(|l| l.sync.id == item.id)
                    .or_else(|| {
                        logical_id
                            .as_ref()
                            .and_then(|id| self.logins.iter().position(|l| &l.id == id))
                    });
                match index {
                    Some(index) => {
                        self.logins[index].sync.reassign_id();
                        let rebuilt =
                            build_login_item(&self.logins[index], master_key, sync_key)?;
                        self.logins[index].sync.mark_synced();
                        Some(SyncEvent::Upsert(rebuilt))
                    }
                    None => None,
                }
            }
            ItemKind::FormPage => {
                let index = self
                    .pages
                    .iter()
                    .position(|p| p.sync.id == item.id)
                    .or_else(|| {
                        logical_id
                            .as_ref()
                            .and_then(|url| self.pages.iter().position(|p| &p.url == url))
                    });
                match index {
                    Some(index) => {
                        self.pages[index].sync.reassign_id();
                        let rebuilt = build_page_item(&self.pages[index], master_key, sync_key)?;
                        self.pages[index].sync.mark_synced();
                        Some(SyncEvent::Upsert(rebuilt))
                    }
                    None => None,
                }
            }
        };

        // Re-upload before deleting so the peer never has a window with no
        // copy of the credential.
        if let Some(event) = rebuilt {
            self.send_event(event);
            self.persist()?;
        }
        self.send_event(SyncEvent::Delete {
            kind: item.kind,
            id: item.id.clone(),
        });
        Ok(())
    }

    /// Outgoing delete for a locally removed record. Suppressed while an
    /// incoming item is being applied and for records the peer never saw.
    fn emit_delete(&self, kind: ItemKind, id: &str, status: SyncStatus) {
        if self.sync_blocked || !status.emits_delete() || id.is_empty() {
            return;
        }
        self.send_event(SyncEvent::Delete {
            kind,
            id: id.to_string(),
        });
    }

    fn send_event(&self, event: SyncEvent) {
        if let Some(transport) = &self.transport {
            transport.send(event);
        }
    }

    // --- Internals ---

    fn seal_per_regime(
        &self,
        plaintext: &str,
        key: Option<&[u8; 32]>,
    ) -> Result<PasswordBlob, VaultError> {
        if self.gate.is_strong() {
            let key = key.ok_or(VaultError::DecryptionFailure)?;
            PasswordBlob::encrypt(plaintext, key)
        } else {
            PasswordBlob::obfuscate(plaintext)
        }
    }

    fn persist(&self) -> Result<(), VaultError> {
        let db = Database {
            strong: self.gate.is_strong(),
            pages: self.pages.clone(),
            logins: self.logins.clone(),
        };
        format::save(&self.path, &db)
    }

    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn notify_submit(&self, token: StoreToken, page: &FormPage) -> bool {
        let handled = self
            .listeners
            .iter()
            .filter(|l| l.on_submit_offer(token, page))
            .count();
        if handled != 1 {
            warn!(handled, "store offer should be handled by exactly one listener");
        }
        handled >= 1
    }

    fn notify_select(&self, token: StoreToken, matches: &[MatchSummary]) -> bool {
        let handled = self
            .listeners
            .iter()
            .filter(|l| l.on_select_match(token, matches))
            .count();
        if handled != 1 {
            warn!(handled, "match chooser should be handled by exactly one listener");
        }
        handled >= 1
    }

    fn notify_page_added(&self, page: &FormPage) {
        for listener in &self.listeners {
            listener.on_page_added(page);
        }
    }

    fn notify_page_removed(&self, page: &FormPage) {
        for listener in &self.listeners {
            listener.on_page_removed(page);
        }
    }

    fn notify_login_added(&self, login: &ServerLogin) {
        for listener in &self.listeners {
            listener.on_login_added(login);
        }
    }

    fn notify_login_removed(&self, login: &ServerLogin) {
        for listener in &self.listeners {
            listener.on_login_removed(login);
        }
    }

    fn notify_security(&self, successful: bool, changed: bool, strong: bool) {
        for listener in &self.listeners {
            listener.on_security_state_change(successful, changed, strong);
        }
    }
}

fn auth_state_path(path: &Path) -> PathBuf {
    path.with_extension("auth.json")
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".save");
    PathBuf::from(name)
}

/// Build the stored page for a submitted form, all values obfuscated;
/// password fields get upgraded at store time if the regime is strong.
fn page_from_snapshot(
    doc: &DocumentContext,
    form: &FormSnapshot,
) -> Result<FormPage, VaultError> {
    let mut fields = Vec::with_capacity(form.fields.len());
    for live in &form.fields {
        fields.push(FieldRecord {
            name: live.name.clone(),
            value: PasswordBlob::obfuscate(&live.value)?,
            is_password: live.is_password,
            is_textfield: live.is_textfield,
            is_changed: live.user_edited,
            is_guessed_username: false,
        });
    }
    let mut page = FormPage {
        url: normalize_url(&doc.url),
        top_url: normalize_url(&doc.top_url),
        action_url: form.action_url.clone(),
        submit_name: form.submit_name.clone(),
        form_number: form.form_number,
        never_on_this_page: false,
        on_this_server: false,
        fields,
        sync: crate::sync::status::SyncRecord::new_local(),
    };
    if let Some(index) = page.best_username_field() {
        page.fields[index].is_guessed_username = true;
    }
    Ok(page)
}

/// Whether the stored page's detected username equals the live form's
/// current value for that field. Pages without a detected username never
/// match a username-restricted request.
fn username_matches(page: &FormPage, form: &FormSnapshot) -> bool {
    let Some(index) = page.best_username_field() else {
        return false;
    };
    let stored = &page.fields[index];
    let Some(live) = form.fields.iter().find(|f| f.name == stored.name) else {
        return false;
    };
    // Username fields stay obfuscated in both regimes.
    match stored.value.reveal(None) {
        Ok(value) => *value == live.value,
        Err(_) => false,
    }
}

/// Whether a stored page already holds exactly the submitted values.
/// Strong-encrypted stored passwords cannot be compared without the master
/// key; they count as different, which safely re-offers an update.
fn page_matches_snapshot(page: &FormPage, form: &FormSnapshot) -> bool {
    for live in &form.fields {
        if live.value.is_empty() {
            continue;
        }
        let Some(stored) = page.fields.iter().find(|f| f.name == live.name) else {
            return false;
        };
        match stored.value.reveal(None) {
            Ok(value) => {
                if *value != live.value {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }
    true
}
