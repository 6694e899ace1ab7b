// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master password handling, security sessions and suspended operations.
//!
//! The pieces here implement the cooperative single-threaded security model:
//! a [`handler::MasterPasswordHandler`] owns prompt state and the verified
//! key cache, a [`gate::MasterGate`] hands out refcounted RAII
//! [`gate::SecurityGuard`]s, and a [`queue::SuspendedQueue`] parks
//! operations that cannot proceed until an asynchronous prompt resolves.

pub mod gate;
pub mod handler;
pub mod prompt;
pub mod queue;

pub use gate::{Acquire, MasterGate, SecurityGuard};
pub use handler::{MasterPasswordHandler, PromptOutcome, Retrieval};
pub use prompt::{
    get_master_passphrase, PasswordPrompt, PromptMode, PromptReason, PromptRequest,
};
pub use queue::SuspendedQueue;
