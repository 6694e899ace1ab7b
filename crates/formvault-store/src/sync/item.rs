// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire mapping between stored records and sync items.
//!
//! Every secret field of a [`SyncItem`] is a base64 AES-128-GCM blob under
//! the sync key. The last-modified stamp stays plaintext so peers can
//! resolve conflicts without decrypting. Form credentials carry their full
//! field list as an encrypted JSON payload in `form_data`.

use chrono::{DateTime, Utc};
use formvault_core::VaultError;
use formvault_crypto::{open_blob_b64, seal_blob_b64, PasswordBlob};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use zeroize::Zeroizing;

use crate::record::{FieldRecord, FormPage, ServerLogin};
use crate::sync::status::SyncRecord;

/// Which record type an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum ItemKind {
    FormPage,
    Login,
}

/// One credential on the wire. All string fields except `id` and
/// `modified` are encrypted base64 blobs.
#[derive(Debug, Clone)]
pub struct SyncItem {
    pub kind: ItemKind,
    pub id: String,
    pub username: String,
    pub password: String,
    pub page_url: String,
    pub modified: DateTime<Utc>,
    /// Form credentials only: encrypted JSON of the full field list and
    /// form identity.
    pub form_data: Option<String>,
}

/// Decrypted field entry inside `form_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainField {
    pub name: String,
    pub value: String,
    pub is_password: bool,
    pub is_textfield: bool,
    pub is_changed: bool,
    pub is_guessed_username: bool,
}

/// Decrypted `form_data` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainFormData {
    pub top_url: String,
    pub action_url: String,
    pub submit_name: String,
    pub form_number: u32,
    pub on_this_server: bool,
    pub fields: Vec<PlainField>,
}

/// A fully decrypted incoming item.
pub struct PlainItem {
    pub username: Zeroizing<String>,
    pub password: Zeroizing<String>,
    pub page_url: String,
    pub form_data: Option<PlainFormData>,
}

fn seal_str(sync_key: &[u8; 16], value: &str) -> Result<String, VaultError> {
    seal_blob_b64(sync_key, value.as_bytes())
}

fn open_str(sync_key: &[u8; 16], blob: &str) -> Result<Zeroizing<String>, VaultError> {
    let plain = open_blob_b64(sync_key, blob)?;
    let s = String::from_utf8(plain.to_vec()).map_err(|_| VaultError::DecryptionFailure)?;
    Ok(Zeroizing::new(s))
}

/// Best-effort decryption of a single wire field, for repair lookups on
/// items that failed full decryption.
pub fn try_decrypt_field(sync_key: &[u8; 16], blob: &str) -> Option<String> {
    open_str(sync_key, blob).ok().map(|s| s.to_string())
}

/// Build the wire item for a server login.
pub fn build_login_item(
    login: &ServerLogin,
    master_key: Option<&[u8; 32]>,
    sync_key: &[u8; 16],
) -> Result<SyncItem, VaultError> {
    let password = login.password.reveal(master_key)?;
    Ok(SyncItem {
        kind: ItemKind::Login,
        id: login.sync.id.clone(),
        username: seal_str(sync_key, &login.username)?,
        password: seal_str(sync_key, &password)?,
        page_url: seal_str(sync_key, &login.id)?,
        modified: login.sync.modified,
        form_data: None,
    })
}

/// Build the wire item for a form page.
pub fn build_page_item(
    page: &FormPage,
    master_key: Option<&[u8; 32]>,
    sync_key: &[u8; 16],
) -> Result<SyncItem, VaultError> {
    let username = page.username_hint()?;
    let password = match page.fields.iter().find(|f| f.is_password) {
        Some(field) => field.value.reveal(master_key)?,
        None => Zeroizing::new(String::new()),
    };

    let mut plain_fields = Vec::with_capacity(page.fields.len());
    for field in &page.fields {
        plain_fields.push(PlainField {
            name: field.name.clone(),
            value: field.value.reveal(master_key)?.to_string(),
            is_password: field.is_password,
            is_textfield: field.is_textfield,
            is_changed: field.is_changed,
            is_guessed_username: field.is_guessed_username,
        });
    }
    let form_data = PlainFormData {
        top_url: page.top_url.clone(),
        action_url: page.action_url.clone(),
        submit_name: page.submit_name.clone(),
        form_number: page.form_number,
        on_this_server: page.on_this_server,
        fields: plain_fields,
    };
    let json = serde_json::to_string(&form_data)
        .map_err(|e| VaultError::Internal(format!("form data serialize: {e}")))?;

    Ok(SyncItem {
        kind: ItemKind::FormPage,
        id: page.sync.id.clone(),
        username: seal_str(sync_key, &username)?,
        password: seal_str(sync_key, &password)?,
        page_url: seal_str(sync_key, &page.url)?,
        modified: page.sync.modified,
        form_data: Some(seal_str(sync_key, &json)?),
    })
}

/// Decrypt every field of an incoming item.
///
/// Any blob that fails to open makes the whole item undecryptable; the
/// caller goes down the repair path.
pub fn decrypt_item(item: &SyncItem, sync_key: &[u8; 16]) -> Result<PlainItem, VaultError> {
    let username = open_str(sync_key, &item.username)?;
    let password = open_str(sync_key, &item.password)?;
    let page_url = open_str(sync_key, &item.page_url)?.to_string();
    let form_data = match &item.form_data {
        Some(blob) => {
            let json = open_str(sync_key, blob)?;
            Some(
                serde_json::from_str::<PlainFormData>(&json)
                    .map_err(|_| VaultError::DecryptionFailure)?,
            )
        }
        None => None,
    };
    Ok(PlainItem {
        username,
        password,
        page_url,
        form_data,
    })
}

/// Materialize a server login from a decrypted incoming item.
pub fn login_from_item(
    item: &SyncItem,
    plain: &PlainItem,
    strong: bool,
    master_key: Option<&[u8; 32]>,
) -> Result<ServerLogin, VaultError> {
    Ok(ServerLogin {
        id: plain.page_url.clone(),
        username: plain.username.to_string(),
        password: seal_per_regime(&plain.password, strong, master_key)?,
        sync: SyncRecord::from_peer(item.id.clone(), item.modified),
    })
}

/// Materialize a form page from a decrypted incoming item.
pub fn page_from_item(
    item: &SyncItem,
    plain: &PlainItem,
    strong: bool,
    master_key: Option<&[u8; 32]>,
) -> Result<FormPage, VaultError> {
    let data = plain
        .form_data
        .as_ref()
        .ok_or(VaultError::DecryptionFailure)?;

    let mut fields = Vec::with_capacity(data.fields.len());
    for pf in &data.fields {
        let value = if pf.is_password {
            seal_per_regime(&pf.value, strong, master_key)?
        } else {
            PasswordBlob::obfuscate(&pf.value)?
        };
        fields.push(FieldRecord {
            name: pf.name.clone(),
            value,
            is_password: pf.is_password,
            is_textfield: pf.is_textfield,
            is_changed: pf.is_changed,
            is_guessed_username: pf.is_guessed_username,
        });
    }

    Ok(FormPage {
        url: plain.page_url.clone(),
        top_url: data.top_url.clone(),
        action_url: data.action_url.clone(),
        submit_name: data.submit_name.clone(),
        form_number: data.form_number,
        never_on_this_page: false,
        on_this_server: data.on_this_server,
        fields,
        sync: SyncRecord::from_peer(item.id.clone(), item.modified),
    })
}

/// Seal a password plaintext according to the active regime.
fn seal_per_regime(
    plaintext: &str,
    strong: bool,
    master_key: Option<&[u8; 32]>,
) -> Result<PasswordBlob, VaultError> {
    if strong {
        let key = master_key.ok_or(VaultError::DecryptionFailure)?;
        PasswordBlob::encrypt(plaintext, key)
    } else {
        PasswordBlob::obfuscate(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formvault_crypto::fill_random;

    fn sync_key() -> [u8; 16] {
        let mut key = [0u8; 16];
        fill_random(&mut key).unwrap();
        key
    }

    fn sample_login() -> ServerLogin {
        ServerLogin {
            id: "https://mail.example.org".to_string(),
            username: "alice".to_string(),
            password: PasswordBlob::obfuscate("mailpw!").unwrap(),
            sync: SyncRecord::new_local(),
        }
    }

    #[test]
    fn login_item_roundtrip() {
        let key = sync_key();
        let login = sample_login();

        let item = build_login_item(&login, None, &key).unwrap();
        assert_eq!(item.kind, ItemKind::Login);
        assert_eq!(item.id, login.sync.id);
        // Secret fields are not plaintext on the wire.
        assert_ne!(item.username, "alice");

        let plain = decrypt_item(&item, &key).unwrap();
        assert_eq!(&**plain.username, "alice");
        assert_eq!(&**plain.password, "mailpw!");
        assert_eq!(plain.page_url, "https://mail.example.org");

        let rebuilt = login_from_item(&item, &plain, false, None).unwrap();
        assert_eq!(rebuilt.id, login.id);
        assert_eq!(rebuilt.username, login.username);
        assert_eq!(&*rebuilt.password.reveal(None).unwrap(), "mailpw!");
        assert_eq!(rebuilt.sync.id, login.sync.id);
    }

    #[test]
    fn page_item_carries_the_full_field_list() {
        let key = sync_key();
        let page = FormPage {
            url: "https://example.org/login".to_string(),
            top_url: "https://example.org/login".to_string(),
            action_url: "https://example.org/do".to_string(),
            submit_name: "go".to_string(),
            form_number: 1,
            never_on_this_page: false,
            on_this_server: false,
            fields: vec![
                FieldRecord {
                    name: "user".to_string(),
                    value: PasswordBlob::obfuscate("alice").unwrap(),
                    is_password: false,
                    is_textfield: true,
                    is_changed: true,
                    is_guessed_username: true,
                },
                FieldRecord {
                    name: "pw".to_string(),
                    value: PasswordBlob::obfuscate("hunter2").unwrap(),
                    is_password: true,
                    is_textfield: false,
                    is_changed: true,
                    is_guessed_username: false,
                },
            ],
            sync: SyncRecord::new_local(),
        };

        let item = build_page_item(&page, None, &key).unwrap();
        let plain = decrypt_item(&item, &key).unwrap();
        assert_eq!(&**plain.username, "alice");
        assert_eq!(&**plain.password, "hunter2");

        let rebuilt = page_from_item(&item, &plain, false, None).unwrap();
        assert_eq!(rebuilt.fields.len(), 2);
        assert_eq!(rebuilt.form_number, 1);
        assert_eq!(&*rebuilt.fields[1].value.reveal(None).unwrap(), "hunter2");
    }

    #[test]
    fn rotated_sync_key_fails_decryption() {
        let key = sync_key();
        let other = sync_key();
        let item = build_login_item(&sample_login(), None, &key).unwrap();

        assert!(matches!(
            decrypt_item(&item, &other),
            Err(VaultError::DecryptionFailure)
        ));
    }

    #[test]
    fn strong_regime_seals_incoming_passwords_under_master_key() {
        let key = sync_key();
        let master = formvault_crypto::generate_random_key().unwrap();
        let item = build_login_item(&sample_login(), None, &key).unwrap();
        let plain = decrypt_item(&item, &key).unwrap();

        let rebuilt = login_from_item(&item, &plain, true, Some(&master)).unwrap();
        assert!(rebuilt.password.reveal(None).is_err());
        assert_eq!(&*rebuilt.password.reveal(Some(&master)).unwrap(), "mailpw!");

        // Strong regime without a key is an error, not a downgrade.
        assert!(login_from_item(&item, &plain, true, None).is_err());
    }
}
