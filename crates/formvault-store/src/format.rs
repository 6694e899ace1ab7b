// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned binary database file.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! [version:i32][strong:u8]
//! [pageCount:i32] pages...
//! [loginCount:i32] logins...
//! ```
//!
//! Every string is written as a length-prefixed ciphertext sealed under the
//! obfuscation key; plaintext never reaches the file, not even field names.
//! Password blobs keep their own regime tag so a strong-encrypted database
//! can be parsed (though not revealed) without the master key. Saves go
//! through a temp file in the same directory plus an atomic rename.

use std::path::Path;

use chrono::{DateTime, Utc};
use formvault_core::VaultError;
use formvault_crypto::{open_blob, seal_blob, PasswordBlob, OBFUSCATION_KEY};
use tracing::debug;

use crate::record::{FieldRecord, FormPage, ServerLogin};
use crate::sync::status::{SyncRecord, SyncStatus};

pub const FORMAT_VERSION: i32 = 1;

// Field flag bits.
const FIELD_PASSWORD: u8 = 0x01;
const FIELD_TEXTFIELD: u8 = 0x02;
const FIELD_CHANGED: u8 = 0x04;
const FIELD_GUESSED_USERNAME: u8 = 0x08;

// Page flag bits.
const PAGE_NEVER_ON_THIS_PAGE: u8 = 0x01;
const PAGE_ON_THIS_SERVER: u8 = 0x02;

/// Everything the database file holds.
#[derive(Debug, Clone, Default)]
pub struct Database {
    pub strong: bool,
    pub pages: Vec<FormPage>,
    pub logins: Vec<ServerLogin>,
}

/// Serialize the database to its on-disk form.
pub fn encode(db: &Database) -> Result<Vec<u8>, VaultError> {
    let mut buf = Vec::new();
    write_i32(&mut buf, FORMAT_VERSION);
    buf.push(db.strong as u8);

    write_i32(&mut buf, i32::try_from(db.pages.len()).map_err(too_many)?);
    for page in &db.pages {
        write_page(&mut buf, page)?;
    }

    write_i32(&mut buf, i32::try_from(db.logins.len()).map_err(too_many)?);
    for login in &db.logins {
        write_login(&mut buf, login)?;
    }

    Ok(buf)
}

/// Parse a database file image.
pub fn decode(data: &[u8]) -> Result<Database, VaultError> {
    let mut reader = Reader { data, pos: 0 };

    let version = reader.read_i32()?;
    if version != FORMAT_VERSION {
        return Err(VaultError::Corrupt(format!(
            "unsupported database version {version}"
        )));
    }
    let strong = reader.read_u8()? != 0;

    let page_count = reader.read_count()?;
    // Counts are untrusted; cap the pre-allocation by the bytes actually
    // left, so an absurd count fails as Corrupt instead of aborting the
    // allocator.
    let mut pages = Vec::with_capacity(page_count.min(reader.remaining()));
    for _ in 0..page_count {
        pages.push(read_page(&mut reader)?);
    }

    let login_count = reader.read_count()?;
    let mut logins = Vec::with_capacity(login_count.min(reader.remaining()));
    for _ in 0..login_count {
        logins.push(read_login(&mut reader)?);
    }

    if !reader.at_end() {
        return Err(VaultError::Corrupt("trailing bytes".to_string()));
    }

    Ok(Database {
        strong,
        pages,
        logins,
    })
}

/// Write the database atomically: temp file in the target directory, then
/// rename over the destination.
pub fn save(path: &Path, db: &Database) -> Result<(), VaultError> {
    let bytes = encode(db)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut tmp, &bytes)?;
    tmp.persist(path).map_err(|e| VaultError::Storage {
        source: Box::new(e.error),
    })?;
    debug!(path = %path.display(), pages = db.pages.len(), logins = db.logins.len(), "database saved");
    Ok(())
}

/// Read and parse the database file.
pub fn load(path: &Path) -> Result<Database, VaultError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

fn too_many(_: std::num::TryFromIntError) -> VaultError {
    VaultError::Internal("record count exceeds i32".to_string())
}

fn write_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), VaultError> {
    write_i32(buf, i32::try_from(data.len()).map_err(too_many)?);
    buf.extend_from_slice(data);
    Ok(())
}

/// Strings are sealed under the obfuscation key before hitting the file.
fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<(), VaultError> {
    if s.is_empty() {
        write_i32(buf, 0);
        return Ok(());
    }
    let sealed = seal_blob(&OBFUSCATION_KEY, s.as_bytes())?;
    write_bytes(buf, &sealed)
}

fn write_blob(buf: &mut Vec<u8>, blob: &PasswordBlob) -> Result<(), VaultError> {
    buf.push(blob.mode().tag());
    write_bytes(buf, blob.data())
}

fn write_sync(buf: &mut Vec<u8>, sync: &SyncRecord) -> Result<(), VaultError> {
    write_i32(buf, sync.status.tag());
    write_string(buf, &sync.id)?;
    write_string(buf, &sync.modified.to_rfc3339())
}

fn write_field(buf: &mut Vec<u8>, field: &FieldRecord) -> Result<(), VaultError> {
    write_string(buf, &field.name)?;
    write_blob(buf, &field.value)?;
    let mut flags = 0u8;
    if field.is_password {
        flags |= FIELD_PASSWORD;
    }
    if field.is_textfield {
        flags |= FIELD_TEXTFIELD;
    }
    if field.is_changed {
        flags |= FIELD_CHANGED;
    }
    if field.is_guessed_username {
        flags |= FIELD_GUESSED_USERNAME;
    }
    buf.push(flags);
    Ok(())
}

fn write_page(buf: &mut Vec<u8>, page: &FormPage) -> Result<(), VaultError> {
    write_string(buf, &page.url)?;
    write_string(buf, &page.top_url)?;
    write_string(buf, &page.action_url)?;
    write_string(buf, &page.submit_name)?;
    write_i32(buf, page.form_number as i32);
    let mut flags = 0u8;
    if page.never_on_this_page {
        flags |= PAGE_NEVER_ON_THIS_PAGE;
    }
    if page.on_this_server {
        flags |= PAGE_ON_THIS_SERVER;
    }
    buf.push(flags);
    write_i32(buf, i32::try_from(page.fields.len()).map_err(too_many)?);
    for field in &page.fields {
        write_field(buf, field)?;
    }
    write_sync(buf, &page.sync)
}

fn write_login(buf: &mut Vec<u8>, login: &ServerLogin) -> Result<(), VaultError> {
    write_string(buf, &login.id)?;
    write_string(buf, &login.username)?;
    write_blob(buf, &login.password)?;
    write_sync(buf, &login.sync)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], VaultError> {
        if self.pos + len > self.data.len() {
            return Err(VaultError::Corrupt("truncated database".to_string()));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, VaultError> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32, VaultError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_count(&mut self) -> Result<usize, VaultError> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| VaultError::Corrupt("negative count".to_string()))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, VaultError> {
        let len = self.read_count()?;
        Ok(self.take(len)?.to_vec())
    }

    fn read_string(&mut self) -> Result<String, VaultError> {
        let sealed = self.read_bytes()?;
        if sealed.is_empty() {
            return Ok(String::new());
        }
        let plain = open_blob(&OBFUSCATION_KEY, &sealed)
            .map_err(|_| VaultError::Corrupt("undecryptable string".to_string()))?;
        String::from_utf8(plain.to_vec())
            .map_err(|_| VaultError::Corrupt("string is not valid UTF-8".to_string()))
    }

    fn read_blob(&mut self) -> Result<PasswordBlob, VaultError> {
        let tag = self.read_u8()?;
        let data = self.read_bytes()?;
        PasswordBlob::from_parts(tag, data)
    }

    fn read_sync(&mut self) -> Result<SyncRecord, VaultError> {
        let status = SyncStatus::from_tag(self.read_i32()?)?;
        let id = self.read_string()?;
        let modified = self.read_string()?;
        let modified = DateTime::parse_from_rfc3339(&modified)
            .map_err(|_| VaultError::Corrupt("bad sync timestamp".to_string()))?
            .with_timezone(&Utc);
        Ok(SyncRecord {
            id,
            modified,
            status,
        })
    }
}

fn read_field(reader: &mut Reader) -> Result<FieldRecord, VaultError> {
    let name = reader.read_string()?;
    let value = reader.read_blob()?;
    let flags = reader.read_u8()?;
    Ok(FieldRecord {
        name,
        value,
        is_password: flags & FIELD_PASSWORD != 0,
        is_textfield: flags & FIELD_TEXTFIELD != 0,
        is_changed: flags & FIELD_CHANGED != 0,
        is_guessed_username: flags & FIELD_GUESSED_USERNAME != 0,
    })
}

fn read_page(reader: &mut Reader) -> Result<FormPage, VaultError> {
    let url = reader.read_string()?;
    let top_url = reader.read_string()?;
    let action_url = reader.read_string()?;
    let submit_name = reader.read_string()?;
    let form_number = reader.read_i32()? as u32;
    let flags = reader.read_u8()?;
    let field_count = reader.read_count()?;
    let mut fields = Vec::with_capacity(field_count.min(reader.remaining()));
    for _ in 0..field_count {
        fields.push(read_field(reader)?);
    }
    let sync = reader.read_sync()?;
    Ok(FormPage {
        url,
        top_url,
        action_url,
        submit_name,
        form_number,
        never_on_this_page: flags & PAGE_NEVER_ON_THIS_PAGE != 0,
        on_this_server: flags & PAGE_ON_THIS_SERVER != 0,
        fields,
        sync,
    })
}

fn read_login(reader: &mut Reader) -> Result<ServerLogin, VaultError> {
    let id = reader.read_string()?;
    let username = reader.read_string()?;
    let password = reader.read_blob()?;
    let sync = reader.read_sync()?;
    Ok(ServerLogin {
        id,
        username,
        password,
        sync,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use formvault_crypto::PasswordBlob;

    fn sample_db() -> Database {
        Database {
            strong: false,
            pages: vec![FormPage {
                url: "https://example.org/login".to_string(),
                top_url: "https://example.org/login".to_string(),
                action_url: "https://example.org/do-login".to_string(),
                submit_name: "submit".to_string(),
                form_number: 2,
                never_on_this_page: false,
                on_this_server: true,
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
            }],
            logins: vec![ServerLogin {
                id: "*https://mail.example.org".to_string(),
                username: "alice".to_string(),
                password: PasswordBlob::obfuscate("mailpw!").unwrap(),
                sync: SyncRecord::new_local(),
            }],
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let db = sample_db();
        let decoded = decode(&encode(&db).unwrap()).unwrap();

        assert_eq!(decoded.strong, db.strong);
        assert_eq!(decoded.pages.len(), 1);
        assert_eq!(decoded.logins.len(), 1);

        let page = &decoded.pages[0];
        assert_eq!(page.url, "https://example.org/login");
        assert_eq!(page.form_number, 2);
        assert!(page.on_this_server);
        assert_eq!(page.fields.len(), 2);
        assert_eq!(page.fields[0].name, "user");
        assert!(page.fields[0].is_guessed_username);
        assert_eq!(&*page.fields[1].value.reveal(None).unwrap(), "hunter2");
        assert_eq!(page.sync, db.pages[0].sync);

        let login = &decoded.logins[0];
        assert_eq!(login.username, "alice");
        assert_eq!(&*login.password.reveal(None).unwrap(), "mailpw!");
    }

    #[test]
    fn no_plaintext_leaks_into_the_file_image() {
        let bytes = encode(&sample_db()).unwrap();
        let haystack = String::from_utf8_lossy(&bytes);
        for needle in ["alice", "hunter2", "mailpw!", "example.org"] {
            assert!(!haystack.contains(needle), "found {needle} in file image");
        }
    }

    #[test]
    fn truncated_file_is_corrupt_not_panic() {
        let bytes = encode(&sample_db()).unwrap();
        for len in [0, 3, 5, bytes.len() / 2, bytes.len() - 1] {
            assert!(matches!(
                decode(&bytes[..len]),
                Err(VaultError::Corrupt(_)) | Err(VaultError::Storage { .. })
            ));
        }
    }

    #[test]
    fn absurd_record_counts_are_corrupt_not_oom() {
        // [version=1][strong=0][pageCount=i32::MAX]: nine bytes claiming
        // two billion pages must not reserve memory for them.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(VaultError::Corrupt(_))));

        // Same for the login count behind an empty page list.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = encode(&sample_db()).unwrap();
        bytes[0] = 99;
        assert!(matches!(decode(&bytes), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn save_and_load_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.dat");
        let db = sample_db();

        save(&path, &db).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.pages.len(), 1);
        assert_eq!(loaded.logins.len(), 1);

        // Overwrite is atomic: a second save replaces the file cleanly.
        save(&path, &Database::default()).unwrap();
        let emptied = load(&path).unwrap();
        assert!(emptied.pages.is_empty());
    }
}
