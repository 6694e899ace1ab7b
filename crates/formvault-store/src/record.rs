// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stored credential records and the live-form snapshot types.
//!
//! A [`FormPage`] remembers one form on one page: which fields it had, which
//! one was the password, and the policy flags the user chose. A
//! [`ServerLogin`] is a non-form credential (HTTP auth, mail account) keyed
//! by an id string; ids starting with `*` match every URL on a server, and
//! ids starting with `local:` are internal accounts that survive bulk
//! clears.
//!
//! Page URLs are stored normalized (query stripped) so refreshed session
//! parameters do not defeat matching.

use formvault_core::{VaultError, WindowId};
use formvault_crypto::PasswordBlob;

use crate::sync::status::SyncRecord;

/// Reserved prefix for internal accounts kept out of bulk clears.
pub const INTERNAL_ID_PREFIX: &str = "local:";

/// One field of a live form as the host sees it right now.
#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub value: String,
    pub is_password: bool,
    pub is_textfield: bool,
    /// The user typed into this field (as opposed to a pre-filled value).
    pub user_edited: bool,
}

/// The document a form lives in.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub url: String,
    /// URL of the top document. Differs from `url` inside frames; stored
    /// pages only match when the top documents agree.
    pub top_url: String,
    pub window: Option<WindowId>,
}

/// A live form: identity plus current field contents.
#[derive(Debug, Clone)]
pub struct FormSnapshot {
    pub action_url: String,
    pub submit_name: String,
    pub form_number: u32,
    pub fields: Vec<FormField>,
}

/// One stored form field.
#[derive(Debug, Clone)]
pub struct FieldRecord {
    pub name: String,
    /// Sealed value. Password fields follow the encryption regime;
    /// everything else stays obfuscated.
    pub value: PasswordBlob,
    pub is_password: bool,
    pub is_textfield: bool,
    pub is_changed: bool,
    pub is_guessed_username: bool,
}

/// One stored form on one page.
#[derive(Debug, Clone)]
pub struct FormPage {
    pub url: String,
    pub top_url: String,
    pub action_url: String,
    pub submit_name: String,
    pub form_number: u32,
    /// The user said never to offer storing on this page (or server, when
    /// combined with `on_this_server`). Such a page carries no fields.
    pub never_on_this_page: bool,
    /// Match any URL on the same server, not just this exact page.
    pub on_this_server: bool,
    pub fields: Vec<FieldRecord>,
    pub sync: SyncRecord,
}

/// A non-form credential keyed by an id string.
#[derive(Debug, Clone)]
pub struct ServerLogin {
    pub id: String,
    pub username: String,
    pub password: PasswordBlob,
    pub sync: SyncRecord,
}

impl FormPage {
    /// Number of stored password fields.
    pub fn password_field_count(&self) -> usize {
        self.fields.iter().filter(|f| f.is_password).count()
    }

    /// Whether this page matches a requesting document.
    ///
    /// Cross-frame guard first: the stored top document must equal the
    /// requester's top document, otherwise a hostile frame could harvest
    /// credentials stored for its parent. Then either the exact page URL
    /// matches, or the page is server-wide and the servers agree.
    pub fn matches_document(&self, doc: &DocumentContext) -> bool {
        if normalize_url(&self.top_url) != normalize_url(&doc.top_url) {
            return false;
        }
        let doc_url = normalize_url(&doc.url);
        if self.url == doc_url {
            return true;
        }
        self.on_this_server && same_server(&self.url, &doc_url)
    }

    /// Whether the stored form identity matches a live form.
    pub fn matches_form(&self, form: &FormSnapshot) -> bool {
        self.action_url == form.action_url
            && self.submit_name == form.submit_name
            && self.form_number == form.form_number
    }

    /// Index of the stored field most likely to be the username.
    ///
    /// Deterministic scoring over non-password, non-empty fields:
    /// text field +2, user-edited +2, first candidate +1. Highest score
    /// wins; ties go to the earlier field.
    pub fn best_username_field(&self) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        let mut first_candidate = true;
        for (index, field) in self.fields.iter().enumerate() {
            if field.is_password || field.value.is_empty() {
                continue;
            }
            let mut score = 0u32;
            if field.is_textfield {
                score += 2;
            }
            if field.is_changed {
                score += 2;
            }
            if first_candidate {
                score += 1;
                first_candidate = false;
            }
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((index, score)),
            }
        }
        best.map(|(index, _)| index)
    }

    /// Decrypted value of the best username field (obfuscated at rest, so
    /// no master key is needed).
    pub fn username_hint(&self) -> Result<String, VaultError> {
        match self.best_username_field() {
            Some(index) => {
                let field = &self.fields[index];
                if field.is_password {
                    return Ok(String::new());
                }
                Ok(field.value.reveal(None)?.to_string())
            }
            None => Ok(String::new()),
        }
    }
}

impl ServerLogin {
    /// Whether this login's id matches a lookup id in the context of `url`.
    ///
    /// An id of `*` stored together with a server-wide page matches any
    /// lookup on the same server; otherwise ids compare exactly.
    pub fn matches_id(&self, lookup: &str) -> bool {
        if let Some(server) = self.id.strip_prefix('*') {
            if let Some(lookup_server) = lookup.strip_prefix('*') {
                return same_server(server, lookup_server);
            }
            return same_server(server, lookup);
        }
        self.id == lookup
    }

    pub fn is_internal(&self) -> bool {
        self.id.starts_with(INTERNAL_ID_PREFIX)
    }
}

/// Strip the query part so session parameters do not defeat matching.
pub fn normalize_url(url: &str) -> String {
    match url.find('?') {
        Some(pos) => url[..pos].to_string(),
        None => url.to_string(),
    }
}

/// Compare `scheme://host[:port]` of two URLs.
pub fn same_server(a: &str, b: &str) -> bool {
    match (server_of(a), server_of(b)) {
        (Some(sa), Some(sb)) => sa == sb,
        _ => false,
    }
}

/// Extract `scheme://host[:port]` from a URL, if it has one.
pub fn server_of(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")?;
    let rest = &url[scheme_end + 3..];
    if rest.is_empty() {
        return None;
    }
    let host_end = rest.find('/').map_or(url.len(), |p| scheme_end + 3 + p);
    Some(&url[..host_end])
}
