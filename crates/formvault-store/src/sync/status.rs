// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-record sync bookkeeping.

use chrono::{DateTime, Utc};
use formvault_core::VaultError;
use strum::Display;
use uuid::Uuid;

/// Where a record stands relative to the sync peer.
///
/// `Add` never moves to `Modify`: until the record has been pushed once,
/// further local edits are still part of the initial add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SyncStatus {
    /// Created locally, never pushed.
    Add,
    /// Pushed before, changed locally since.
    Modify,
    /// In agreement with the peer.
    Synced,
    /// Removed locally; a delete event has been (or will be) emitted.
    Deleted,
}

impl SyncStatus {
    /// On-disk tag.
    pub fn tag(self) -> i32 {
        match self {
            SyncStatus::Add => 0,
            SyncStatus::Modify => 1,
            SyncStatus::Synced => 2,
            SyncStatus::Deleted => 3,
        }
    }

    /// Parse an on-disk tag.
    pub fn from_tag(tag: i32) -> Result<Self, VaultError> {
        match tag {
            0 => Ok(SyncStatus::Add),
            1 => Ok(SyncStatus::Modify),
            2 => Ok(SyncStatus::Synced),
            3 => Ok(SyncStatus::Deleted),
            other => Err(VaultError::Corrupt(format!("unknown sync status {other}"))),
        }
    }

    /// A deleted record only produces a delete event if the peer ever saw
    /// it. Deleting an `Add` is a local no-op for the peer.
    pub fn emits_delete(self) -> bool {
        self != SyncStatus::Add
    }
}

/// Sync identity and dirty state carried by every stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub id: String,
    pub modified: DateTime<Utc>,
    pub status: SyncStatus,
}

impl SyncRecord {
    /// Fresh identity for a record created locally.
    pub fn new_local() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            modified: Utc::now(),
            status: SyncStatus::Add,
        }
    }

    /// Identity adopted from an incoming sync item.
    pub fn from_peer(id: String, modified: DateTime<Utc>) -> Self {
        Self {
            id,
            modified,
            status: SyncStatus::Synced,
        }
    }

    /// Record a local edit: bump the timestamp and dirty the status.
    /// `Add` stays `Add`; `Synced` becomes `Modify`.
    pub fn touch(&mut self) {
        self.modified = Utc::now();
        if self.status == SyncStatus::Synced {
            self.status = SyncStatus::Modify;
        }
    }

    /// The record has been pushed to (or received from) the peer.
    pub fn mark_synced(&mut self) {
        self.status = SyncStatus::Synced;
    }

    /// Give the record a brand-new sync id (decryption repair path).
    pub fn reassign_id(&mut self) -> String {
        let old = std::mem::replace(&mut self.id, Uuid::new_v4().to_string());
        self.modified = Utc::now();
        old
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_never_becomes_modify() {
        let mut record = SyncRecord::new_local();
        assert_eq!(record.status, SyncStatus::Add);

        record.touch();
        assert_eq!(record.status, SyncStatus::Add);
    }

    #[test]
    fn synced_becomes_modify_on_touch() {
        let mut record = SyncRecord::new_local();
        record.mark_synced();
        record.touch();
        assert_eq!(record.status, SyncStatus::Modify);

        record.touch();
        assert_eq!(record.status, SyncStatus::Modify);
    }

    #[test]
    fn full_lifecycle_add_synced_modify_synced() {
        let mut record = SyncRecord::new_local();
        assert_eq!(record.status, SyncStatus::Add);

        record.mark_synced();
        assert_eq!(record.status, SyncStatus::Synced);

        record.touch();
        assert_eq!(record.status, SyncStatus::Modify);

        record.mark_synced();
        assert_eq!(record.status, SyncStatus::Synced);
    }

    #[test]
    fn delete_events_are_suppressed_for_add() {
        assert!(!SyncStatus::Add.emits_delete());
        assert!(SyncStatus::Synced.emits_delete());
        assert!(SyncStatus::Modify.emits_delete());
    }

    #[test]
    fn reassign_returns_the_old_id() {
        let mut record = SyncRecord::new_local();
        let original = record.id.clone();
        let returned = record.reassign_id();

        assert_eq!(returned, original);
        assert_ne!(record.id, original);
    }

    #[test]
    fn status_tags_roundtrip() {
        for status in [
            SyncStatus::Add,
            SyncStatus::Modify,
            SyncStatus::Synced,
            SyncStatus::Deleted,
        ] {
            assert_eq!(SyncStatus::from_tag(status.tag()).unwrap(), status);
        }
        assert!(SyncStatus::from_tag(42).is_err());
    }
}
