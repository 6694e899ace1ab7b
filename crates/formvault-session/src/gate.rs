// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference-counted security sessions.
//!
//! Every operation that touches protected data opens the gate first. In the
//! obfuscated regime the gate opens immediately. In the strong regime it
//! opens only with a verified master key; otherwise the caller gets
//! [`Acquire::Pending`] and must park itself until the prompt resolves.
//!
//! Acquires nest: a second acquire inside an open session is a no-op that
//! bumps the refcount. The session-scoped key copy is wiped when the count
//! returns to zero. Guards must not be held across a suspension; suspended
//! operations re-acquire when they are replayed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use formvault_core::{VaultError, WindowId};
use secrecy::SecretString;
use tracing::debug;
use zeroize::Zeroizing;

use crate::handler::{MasterPasswordHandler, PromptOutcome, Retrieval};
use crate::prompt::{PromptMode, PromptReason};

/// Result of opening the gate.
pub enum Acquire {
    /// The session is open; the guard keeps it open until dropped.
    Ready(SecurityGuard),
    /// A master password prompt is outstanding; suspend and retry on
    /// resolution.
    Pending,
}

struct GateInner {
    refcount: Cell<u32>,
    session_key: RefCell<Option<Zeroizing<[u8; 32]>>>,
    strong: Cell<bool>,
    handler: RefCell<MasterPasswordHandler>,
}

/// Shared handle to the security session state.
#[derive(Clone)]
pub struct MasterGate {
    inner: Rc<GateInner>,
}

/// RAII session reference. Dropping it releases the session; the last
/// release wipes the session-scoped key copy.
pub struct SecurityGuard {
    inner: Rc<GateInner>,
}

impl MasterGate {
    pub fn new(handler: MasterPasswordHandler, strong: bool) -> Self {
        Self {
            inner: Rc::new(GateInner {
                refcount: Cell::new(0),
                session_key: RefCell::new(None),
                strong: Cell::new(strong),
                handler: RefCell::new(handler),
            }),
        }
    }

    /// Whether the strong-encryption regime is active.
    pub fn is_strong(&self) -> bool {
        self.inner.strong.get()
    }

    /// Flip the regime flag. The caller is responsible for re-sealing
    /// stored blobs to match.
    pub fn set_strong(&self, strong: bool) {
        self.inner.strong.set(strong);
    }

    /// Current number of open session references.
    pub fn refcount(&self) -> u32 {
        self.inner.refcount.get()
    }

    /// Run a closure against the password handler (prompt registration,
    /// state loading, key cache control).
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut MasterPasswordHandler) -> R) -> R {
        f(&mut self.inner.handler.borrow_mut())
    }

    /// Whether a master password prompt is outstanding.
    pub fn prompt_outstanding(&self) -> bool {
        self.inner.handler.borrow().prompt_outstanding()
    }

    /// Open the gate for one logical operation.
    ///
    /// `force_strong` demands the master key even in the obfuscated regime
    /// (regime changes and sync pushes need it).
    pub fn acquire(
        &self,
        window: Option<WindowId>,
        force_strong: bool,
        reason: PromptReason,
    ) -> Result<Acquire, VaultError> {
        let strong_needed = self.inner.strong.get() || force_strong;

        if self.inner.refcount.get() > 0 {
            // Nested acquire: the session is already open. Top up the
            // session key if an earlier weak acquire opened it without one.
            if strong_needed && self.inner.session_key.borrow().is_none() {
                if let Some(key) = self.inner.handler.borrow_mut().cached_key() {
                    *self.inner.session_key.borrow_mut() = Some(key);
                } else {
                    return self.begin_prompt(window, reason);
                }
            }
            return Ok(Acquire::Ready(self.guard()));
        }

        if !strong_needed {
            *self.inner.session_key.borrow_mut() = None;
            return Ok(Acquire::Ready(self.guard()));
        }

        if let Some(key) = self.inner.handler.borrow_mut().cached_key() {
            *self.inner.session_key.borrow_mut() = Some(key);
            return Ok(Acquire::Ready(self.guard()));
        }

        self.begin_prompt(window, reason)
    }

    fn begin_prompt(
        &self,
        window: Option<WindowId>,
        reason: PromptReason,
    ) -> Result<Acquire, VaultError> {
        let mut handler = self.inner.handler.borrow_mut();
        let mode = if handler.has_master_password() {
            PromptMode::AskPassword
        } else {
            PromptMode::NewPassword
        };
        match handler.retrieve_master_password(mode, reason, window)? {
            Retrieval::Ready => {
                // A cached key appeared between checks; use it.
                let key = handler
                    .cached_key()
                    .ok_or_else(|| VaultError::Internal("ready without cached key".to_string()))?;
                drop(handler);
                *self.inner.session_key.borrow_mut() = Some(key);
                Ok(Acquire::Ready(self.guard()))
            }
            Retrieval::Pending => Ok(Acquire::Pending),
        }
    }

    /// Forward the host's prompt answer to the handler.
    pub fn password_done(
        &self,
        ok: bool,
        old: &SecretString,
        new: &SecretString,
    ) -> Result<PromptOutcome, VaultError> {
        self.inner.handler.borrow_mut().password_done(ok, old, new)
    }

    fn guard(&self) -> SecurityGuard {
        self.inner.refcount.set(self.inner.refcount.get() + 1);
        SecurityGuard {
            inner: self.inner.clone(),
        }
    }
}

impl SecurityGuard {
    /// Copy of the session master key, `None` in the obfuscated regime.
    pub fn master_key(&self) -> Option<Zeroizing<[u8; 32]>> {
        self.inner.session_key.borrow().clone()
    }
}

impl Drop for SecurityGuard {
    fn drop(&mut self) {
        let count = self.inner.refcount.get() - 1;
        self.inner.refcount.set(count);
        if count == 0 {
            // Zeroizing wipes the key copy on drop.
            self.inner.session_key.borrow_mut().take();
            debug!("security session closed");
        }
    }
}
