// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sync layer: wire items, per-record status, conflict resolution.
//!
//! Secrets travel as base64 AES-128-GCM blobs under a dedicated sync key
//! that is handed in out-of-band and never persisted. Outgoing events go
//! through the registered [`SyncTransport`]; incoming items are applied by
//! the manager with echo suppression so an applied item is not re-uploaded.

pub mod item;
pub mod resolver;
pub mod status;

use item::{ItemKind, SyncItem};

/// What the peer says happened to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Add,
    Modify,
    Delete,
}

/// An outgoing change for the peer.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Upsert(SyncItem),
    Delete { kind: ItemKind, id: String },
}

/// The remote peer collaborator.
pub trait SyncTransport {
    fn send(&self, event: SyncEvent);
}
