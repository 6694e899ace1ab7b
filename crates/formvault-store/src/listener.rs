// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host notification interface.
//!
//! Hosts register listeners to render the store/update prompt, the
//! multiple-match chooser, and to track database changes. Any number of
//! listeners may observe changes, but exactly one must handle each
//! prompt-style callback (return `true`); the manager logs a warning when
//! zero or several do.

use crate::manager::StoreToken;
use crate::record::{FormPage, ServerLogin};

/// Summary of one stored page offered in the multiple-match chooser.
#[derive(Debug, Clone)]
pub struct MatchSummary {
    /// Index into the manager's stored pages.
    pub page_index: usize,
    /// Decrypted best-guess username, for display.
    pub username: String,
}

/// Host callbacks. Prompt-style methods return whether the listener took
/// responsibility for answering.
pub trait VaultListener {
    /// A submitted form qualifies for storing. The host shows the
    /// store/never/dismiss prompt and answers via `report_store_action`.
    fn on_submit_offer(&self, _token: StoreToken, _page: &FormPage) -> bool {
        false
    }

    /// Several stored pages match; the host shows a chooser and answers via
    /// `select_match`.
    fn on_select_match(&self, _token: StoreToken, _matches: &[MatchSummary]) -> bool {
        false
    }

    fn on_page_added(&self, _page: &FormPage) {}
    fn on_page_removed(&self, _page: &FormPage) {}
    fn on_login_added(&self, _login: &ServerLogin) {}
    fn on_login_removed(&self, _login: &ServerLogin) {}

    /// The encryption regime change finished (or failed, or was cancelled).
    fn on_security_state_change(&self, _successful: bool, _changed: bool, _strong: bool) {}
}
