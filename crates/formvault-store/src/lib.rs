// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential store: records, on-disk codec, manager and sync layer.
//!
//! [`manager::VaultManager`] is the root object. Hosts feed it document and
//! form snapshots, register a [`listener::VaultListener`] for prompts and
//! change notifications, and answer master password requests through
//! `password_done`. Everything runs on one thread; operations that need a
//! password while a prompt is pending suspend and replay in FIFO order.

pub mod format;
pub mod listener;
pub mod manager;
pub mod record;
pub mod suspend;
pub mod sync;

pub use listener::{MatchSummary, VaultListener};
pub use manager::{StoreAction, StoreToken, SubmitOutcome, VaultManager};
pub use record::{DocumentContext, FieldRecord, FormField, FormPage, FormSnapshot, ServerLogin};
pub use suspend::{FetchResult, FieldFill, SuspendedOperation};
pub use sync::item::{ItemKind, SyncItem};
pub use sync::status::{SyncRecord, SyncStatus};
pub use sync::{SyncAction, SyncEvent, SyncTransport};
