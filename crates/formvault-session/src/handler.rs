// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master password verification, key derivation and prompt state.
//!
//! The handler owns the check code: 128 random bytes sealed under a key
//! derived from `candidate ++ VERIFICATION_SUFFIX`. Verifying a candidate is
//! an attempted decryption; the GCM tag rejects wrong passwords without any
//! plaintext comparison. The decrypted check code is appended to the typed
//! password to form the complete password, and the master key is Argon2id of
//! that. The complete-password construction is a legacy-compat scheme, kept
//! as-is (see DESIGN.md).
//!
//! One prompt is outstanding at a time. A retrieval that arrives while a
//! prompt is pending joins it instead of re-invoking the host delegate.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use formvault_config::VaultConfig;
use formvault_core::{VaultError, WindowId};
use formvault_crypto::{
    derive_key_with_context, fill_random, generate_salt, open_blob, seal_blob, KdfParams,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::prompt::{PasswordPrompt, PromptMode, PromptReason, PromptRequest};

const CHECK_CODE_LEN: usize = 128;
const VERIFICATION_SUFFIX: &[u8] = b"formvault.master.verify";

/// Result of asking for the master password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    /// A verified, non-aged key is already cached; no prompt needed.
    Ready,
    /// A prompt is outstanding; the caller must suspend and wait for
    /// `password_done`.
    Pending,
}

/// Resolution of an outstanding prompt.
pub enum PromptOutcome {
    /// The password verified (or was newly established); the derived key is
    /// now cached.
    Success,
    /// The master password was changed; both keys are handed out so stored
    /// blobs can be re-sealed.
    Changed {
        old_key: Zeroizing<[u8; 32]>,
        new_key: Zeroizing<[u8; 32]>,
    },
    /// The candidate did not verify against the check code.
    WrongPassword,
    /// The user dismissed the dialog.
    Cancelled,
}

/// Persisted authentication state: the sealed check code and both salts.
struct AuthState {
    check_code: Vec<u8>,
    check_salt: [u8; 16],
    key_salt: [u8; 16],
}

#[derive(Serialize, Deserialize)]
struct AuthStateFile {
    check_code: String,
    check_salt: String,
    key_salt: String,
}

struct CachedKey {
    key: Zeroizing<[u8; 32]>,
    verified_at: Instant,
}

/// Owns prompt state, the check code and the verified-key cache.
pub struct MasterPasswordHandler {
    kdf: KdfParams,
    lifetime: Duration,
    auth: Option<AuthState>,
    cached: Option<CachedKey>,
    outstanding: Option<PromptRequest>,
    prompt: Option<Rc<dyn PasswordPrompt>>,
    state_path: Option<PathBuf>,
}

impl std::fmt::Debug for MasterPasswordHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterPasswordHandler")
            .field("has_auth", &self.auth.is_some())
            .field("has_cached_key", &self.cached.is_some())
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

impl MasterPasswordHandler {
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            kdf: KdfParams {
                memory_cost: config.kdf_memory_cost,
                iterations: config.kdf_iterations,
                parallelism: config.kdf_parallelism,
            },
            lifetime: Duration::from_secs(config.password_lifetime_secs),
            auth: None,
            cached: None,
            outstanding: None,
            prompt: None,
            state_path: None,
        }
    }

    /// Register the host collaborator that renders password dialogs.
    pub fn set_prompt(&mut self, prompt: Rc<dyn PasswordPrompt>) {
        self.prompt = Some(prompt);
    }

    /// Bind to the auth-state sidecar file and load it if present.
    pub fn load_state(&mut self, path: &Path) -> Result<(), VaultError> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let file: AuthStateFile = serde_json::from_str(&raw)
                .map_err(|e| VaultError::Corrupt(format!("auth state file: {e}")))?;
            self.auth = Some(AuthState {
                check_code: BASE64
                    .decode(&file.check_code)
                    .map_err(|e| VaultError::Corrupt(format!("auth state check code: {e}")))?,
                check_salt: decode_salt(&file.check_salt)?,
                key_salt: decode_salt(&file.key_salt)?,
            });
            debug!(path = %path.display(), "loaded master password auth state");
        }
        self.state_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Whether a master password has ever been established.
    pub fn has_master_password(&self) -> bool {
        self.auth.is_some()
    }

    /// Whether a prompt is currently outstanding.
    pub fn prompt_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Validate a candidate master password.
    ///
    /// At least 6 characters; pure-ASCII candidates must mix alphabetic and
    /// non-alphabetic characters. Any non-ASCII character exempts the mix
    /// rule (such passwords are outside the trivially-guessable class the
    /// rule targets).
    pub fn check_password_policy(candidate: &str) -> Result<(), VaultError> {
        if candidate.chars().count() < 6 {
            return Err(VaultError::PolicyRejected(
                "password must be at least 6 characters".to_string(),
            ));
        }
        if candidate.is_ascii() {
            let has_alpha = candidate.chars().any(|c| c.is_ascii_alphabetic());
            let has_other = candidate.chars().any(|c| !c.is_ascii_alphabetic());
            if !has_alpha || !has_other {
                return Err(VaultError::PolicyRejected(
                    "password must mix letters and non-letters".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Return the cached master key if it has not aged out.
    ///
    /// An aged key is purged; the next retrieval prompts again.
    pub fn cached_key(&mut self) -> Option<Zeroizing<[u8; 32]>> {
        if let Some(cached) = &self.cached {
            if cached.verified_at.elapsed() < self.lifetime {
                return Some(cached.key.clone());
            }
            debug!("cached master key aged out");
            self.cached = None;
        }
        None
    }

    /// Drop the cached key so the next retrieval re-prompts.
    pub fn forget_master_password(&mut self) {
        self.cached = None;
    }

    /// Ask for the master password, prompting the host if necessary.
    ///
    /// Returns [`Retrieval::Ready`] when a cached key can satisfy the
    /// request. Otherwise the request is handed to the prompt delegate,
    /// unless one is already outstanding, in which case this retrieval
    /// silently joins it.
    pub fn retrieve_master_password(
        &mut self,
        mode: PromptMode,
        reason: PromptReason,
        window: Option<WindowId>,
    ) -> Result<Retrieval, VaultError> {
        if mode == PromptMode::AskPassword && self.cached_key().is_some() {
            return Ok(Retrieval::Ready);
        }
        if self.outstanding.is_some() {
            debug!(?reason, "prompt already outstanding, joining");
            return Ok(Retrieval::Pending);
        }
        let delegate = self
            .prompt
            .clone()
            .ok_or_else(|| VaultError::Internal("no password prompt registered".to_string()))?;
        let request = PromptRequest {
            mode,
            reason,
            window,
        };
        self.outstanding = Some(request);
        debug!(?mode, ?reason, "requesting master password from host");
        delegate.request_password(request);
        Ok(Retrieval::Pending)
    }

    /// Resolve the outstanding prompt with the host's answer.
    ///
    /// `ok == false` means the dialog was dismissed. A policy rejection on a
    /// new password leaves the prompt outstanding so the host can re-ask
    /// without losing the suspended operations behind it.
    pub fn password_done(
        &mut self,
        ok: bool,
        old: &SecretString,
        new: &SecretString,
    ) -> Result<PromptOutcome, VaultError> {
        let request = self
            .outstanding
            .take()
            .ok_or_else(|| VaultError::Internal("no prompt outstanding".to_string()))?;

        if !ok {
            debug!("master password prompt cancelled");
            return Ok(PromptOutcome::Cancelled);
        }

        match request.mode {
            PromptMode::AskPassword => {
                let candidate = old.expose_secret();
                match self.verify_candidate(candidate) {
                    Ok(code) => {
                        let key_salt = self.key_salt()?;
                        let key = self.master_key_for(candidate, &code, &key_salt)?;
                        self.cache(key);
                        Ok(PromptOutcome::Success)
                    }
                    Err(VaultError::WrongPassword) => {
                        warn!("master password verification failed");
                        Ok(PromptOutcome::WrongPassword)
                    }
                    Err(e) => Err(e),
                }
            }
            PromptMode::NewPassword => {
                let candidate = new.expose_secret();
                if let Err(e) = Self::check_password_policy(candidate) {
                    self.outstanding = Some(request);
                    return Err(e);
                }
                let code = self.create_auth(candidate)?;
                let key_salt = self.key_salt()?;
                let key = self.master_key_for(candidate, &code, &key_salt)?;
                self.cache(key);
                debug!("master password established");
                Ok(PromptOutcome::Success)
            }
            PromptMode::ChangePassword => {
                let old_candidate = old.expose_secret();
                let old_code = match self.verify_candidate(old_candidate) {
                    Ok(code) => code,
                    Err(VaultError::WrongPassword) => {
                        warn!("master password verification failed");
                        return Ok(PromptOutcome::WrongPassword);
                    }
                    Err(e) => return Err(e),
                };
                let new_candidate = new.expose_secret();
                if let Err(e) = Self::check_password_policy(new_candidate) {
                    self.outstanding = Some(request);
                    return Err(e);
                }
                let old_salt = self.key_salt()?;
                let old_key = self.master_key_for(old_candidate, &old_code, &old_salt)?;

                let new_code = self.create_auth(new_candidate)?;
                let new_salt = self.key_salt()?;
                let new_key = self.master_key_for(new_candidate, &new_code, &new_salt)?;
                self.cache(new_key.clone());
                debug!("master password changed");
                Ok(PromptOutcome::Changed { old_key, new_key })
            }
        }
    }

    fn cache(&mut self, key: Zeroizing<[u8; 32]>) {
        self.cached = Some(CachedKey {
            key,
            verified_at: Instant::now(),
        });
    }

    fn key_salt(&self) -> Result<[u8; 16], VaultError> {
        Ok(self
            .auth
            .as_ref()
            .ok_or_else(|| VaultError::Internal("no master password configured".to_string()))?
            .key_salt)
    }

    /// Decrypt the check code with a key derived from the candidate.
    /// Decryption failure means the candidate is wrong.
    fn verify_candidate(&self, candidate: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| VaultError::Internal("no master password configured".to_string()))?;
        let vk = self.verification_key(candidate, &auth.check_salt)?;
        open_blob(&vk, &auth.check_code).map_err(|e| match e {
            VaultError::DecryptionFailure => VaultError::WrongPassword,
            other => other,
        })
    }

    /// Generate a fresh check code and salts for `candidate`, replacing any
    /// previous auth state, and persist the sidecar.
    fn create_auth(&mut self, candidate: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let check_salt = generate_salt()?;
        let key_salt = generate_salt()?;
        let mut code = Zeroizing::new(vec![0u8; CHECK_CODE_LEN]);
        fill_random(&mut code)?;

        let vk = self.verification_key(candidate, &check_salt)?;
        let check_code = seal_blob(&vk, &code)?;

        self.auth = Some(AuthState {
            check_code,
            check_salt,
            key_salt,
        });
        self.save_state()?;
        Ok(code)
    }

    fn verification_key(
        &self,
        candidate: &str,
        salt: &[u8; 16],
    ) -> Result<Zeroizing<[u8; 32]>, VaultError> {
        derive_key_with_context(candidate.as_bytes(), VERIFICATION_SUFFIX, salt, &self.kdf)
    }

    /// Master key = Argon2id(candidate ++ check_code, key_salt).
    fn master_key_for(
        &self,
        candidate: &str,
        code: &[u8],
        key_salt: &[u8; 16],
    ) -> Result<Zeroizing<[u8; 32]>, VaultError> {
        derive_key_with_context(candidate.as_bytes(), code, key_salt, &self.kdf)
    }

    fn save_state(&self) -> Result<(), VaultError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        match &self.auth {
            Some(auth) => {
                let file = AuthStateFile {
                    check_code: BASE64.encode(&auth.check_code),
                    check_salt: BASE64.encode(auth.check_salt),
                    key_salt: BASE64.encode(auth.key_salt),
                };
                let json = serde_json::to_string_pretty(&file)
                    .map_err(|e| VaultError::Internal(format!("auth state serialize: {e}")))?;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, json)?;
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }
}

fn decode_salt(encoded: &str) -> Result<[u8; 16], VaultError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| VaultError::Corrupt(format!("auth state salt: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| VaultError::Corrupt("auth state salt has wrong length".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct RecordingPrompt {
        requests: RefCell<Vec<PromptRequest>>,
    }

    impl RecordingPrompt {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                requests: RefCell::new(Vec::new()),
            })
        }
    }

    impl PasswordPrompt for RecordingPrompt {
        fn request_password(&self, request: PromptRequest) {
            self.requests.borrow_mut().push(request);
        }
    }

    fn test_config() -> VaultConfig {
        VaultConfig {
            // Low-cost Argon2id parameters for fast tests.
            kdf_memory_cost: 1024,
            kdf_iterations: 1,
            kdf_parallelism: 1,
            ..VaultConfig::default()
        }
    }

    fn test_handler() -> (MasterPasswordHandler, Rc<RecordingPrompt>) {
        let prompt = RecordingPrompt::new();
        let mut handler = MasterPasswordHandler::new(&test_config());
        handler.set_prompt(prompt.clone());
        (handler, prompt)
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn establish(handler: &mut MasterPasswordHandler, password: &str) {
        let retrieval = handler
            .retrieve_master_password(PromptMode::NewPassword, PromptReason::RegimeChange, None)
            .unwrap();
        assert_eq!(retrieval, Retrieval::Pending);
        let outcome = handler
            .password_done(true, &secret(""), &secret(password))
            .unwrap();
        assert!(matches!(outcome, PromptOutcome::Success));
    }

    #[test]
    fn policy_rejects_short_passwords() {
        assert!(MasterPasswordHandler::check_password_policy("a1").is_err());
        assert!(MasterPasswordHandler::check_password_policy("abc1!").is_err());
        assert!(MasterPasswordHandler::check_password_policy("abc12!").is_ok());
    }

    #[test]
    fn policy_requires_mixed_ascii() {
        assert!(MasterPasswordHandler::check_password_policy("abcdef").is_err());
        assert!(MasterPasswordHandler::check_password_policy("123456").is_err());
        assert!(MasterPasswordHandler::check_password_policy("abc123").is_ok());
        assert!(MasterPasswordHandler::check_password_policy("abc de").is_ok());
    }

    #[test]
    fn policy_exempts_non_ascii_from_mix_rule() {
        assert!(MasterPasswordHandler::check_password_policy("pässwörter").is_ok());
        // Length still counts characters, not bytes.
        assert!(MasterPasswordHandler::check_password_policy("päss").is_err());
    }

    #[test]
    fn first_time_setup_establishes_master_password() {
        let (mut handler, prompt) = test_handler();
        assert!(!handler.has_master_password());

        establish(&mut handler, "abc123");

        assert!(handler.has_master_password());
        assert!(handler.cached_key().is_some());
        assert_eq!(prompt.requests.borrow().len(), 1);
        assert_eq!(prompt.requests.borrow()[0].mode, PromptMode::NewPassword);
    }

    #[test]
    fn wrong_password_is_reported_not_errored() {
        let (mut handler, _prompt) = test_handler();
        establish(&mut handler, "abc123");
        handler.forget_master_password();

        handler
            .retrieve_master_password(PromptMode::AskPassword, PromptReason::Unlock, None)
            .unwrap();
        let outcome = handler
            .password_done(true, &secret("wrong99"), &secret(""))
            .unwrap();
        assert!(matches!(outcome, PromptOutcome::WrongPassword));
        assert!(handler.cached_key().is_none());
    }

    #[test]
    fn correct_password_rederives_the_same_key() {
        let (mut handler, _prompt) = test_handler();
        establish(&mut handler, "abc123");
        let first_key = handler.cached_key().unwrap();
        handler.forget_master_password();

        handler
            .retrieve_master_password(PromptMode::AskPassword, PromptReason::Unlock, None)
            .unwrap();
        let outcome = handler
            .password_done(true, &secret("abc123"), &secret(""))
            .unwrap();
        assert!(matches!(outcome, PromptOutcome::Success));
        assert_eq!(*handler.cached_key().unwrap(), *first_key);
    }

    #[test]
    fn concurrent_retrievals_compress_into_one_prompt() {
        let (mut handler, prompt) = test_handler();
        let r1 = handler
            .retrieve_master_password(PromptMode::NewPassword, PromptReason::Unlock, None)
            .unwrap();
        let r2 = handler
            .retrieve_master_password(PromptMode::NewPassword, PromptReason::SyncFlush, None)
            .unwrap();

        assert_eq!(r1, Retrieval::Pending);
        assert_eq!(r2, Retrieval::Pending);
        assert_eq!(prompt.requests.borrow().len(), 1);
    }

    #[test]
    fn cached_key_satisfies_retrieval_without_prompting() {
        let (mut handler, prompt) = test_handler();
        establish(&mut handler, "abc123");

        let retrieval = handler
            .retrieve_master_password(PromptMode::AskPassword, PromptReason::Unlock, None)
            .unwrap();
        assert_eq!(retrieval, Retrieval::Ready);
        // Only the setup prompt, no second request.
        assert_eq!(prompt.requests.borrow().len(), 1);
    }

    #[test]
    fn zero_lifetime_ages_the_key_immediately() {
        let prompt = RecordingPrompt::new();
        let mut config = test_config();
        config.password_lifetime_secs = 0;
        let mut handler = MasterPasswordHandler::new(&config);
        handler.set_prompt(prompt);

        establish(&mut handler, "abc123");
        assert!(handler.cached_key().is_none());
    }

    #[test]
    fn cancel_resolves_the_prompt() {
        let (mut handler, _prompt) = test_handler();
        handler
            .retrieve_master_password(PromptMode::NewPassword, PromptReason::Unlock, None)
            .unwrap();
        let outcome = handler
            .password_done(false, &secret(""), &secret(""))
            .unwrap();
        assert!(matches!(outcome, PromptOutcome::Cancelled));
        assert!(!handler.prompt_outstanding());
    }

    #[test]
    fn policy_rejection_keeps_the_prompt_outstanding() {
        let (mut handler, _prompt) = test_handler();
        handler
            .retrieve_master_password(PromptMode::NewPassword, PromptReason::Unlock, None)
            .unwrap();

        let result = handler.password_done(true, &secret(""), &secret("short"));
        assert!(matches!(result, Err(VaultError::PolicyRejected(_))));
        assert!(handler.prompt_outstanding());

        let outcome = handler
            .password_done(true, &secret(""), &secret("abc123"))
            .unwrap();
        assert!(matches!(outcome, PromptOutcome::Success));
    }

    #[test]
    fn change_password_hands_out_both_keys() {
        let (mut handler, _prompt) = test_handler();
        establish(&mut handler, "abc123");
        let original_key = handler.cached_key().unwrap();

        handler
            .retrieve_master_password(PromptMode::ChangePassword, PromptReason::RegimeChange, None)
            .unwrap();
        let outcome = handler
            .password_done(true, &secret("abc123"), &secret("xyz789"))
            .unwrap();

        match outcome {
            PromptOutcome::Changed { old_key, new_key } => {
                assert_eq!(*old_key, *original_key);
                assert_ne!(*old_key, *new_key);
                assert_eq!(*handler.cached_key().unwrap(), *new_key);
            }
            _ => panic!("expected Changed outcome"),
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn ascii_candidates_pass_iff_long_and_mixed(candidate in "[ -~]{0,12}") {
                let long_enough = candidate.chars().count() >= 6;
                let has_alpha = candidate.chars().any(|c| c.is_ascii_alphabetic());
                let has_other = candidate.chars().any(|c| !c.is_ascii_alphabetic());

                let accepted =
                    MasterPasswordHandler::check_password_policy(&candidate).is_ok();
                prop_assert_eq!(accepted, long_enough && has_alpha && has_other);
            }
        }
    }

    #[test]
    fn auth_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.auth.json");

        let (mut handler, _prompt) = test_handler();
        handler.load_state(&path).unwrap();
        establish(&mut handler, "abc123");
        let key = handler.cached_key().unwrap();

        let prompt = RecordingPrompt::new();
        let mut reloaded = MasterPasswordHandler::new(&test_config());
        reloaded.set_prompt(prompt);
        reloaded.load_state(&path).unwrap();
        assert!(reloaded.has_master_password());

        reloaded
            .retrieve_master_password(PromptMode::AskPassword, PromptReason::Unlock, None)
            .unwrap();
        let outcome = reloaded
            .password_done(true, &secret("abc123"), &secret(""))
            .unwrap();
        assert!(matches!(outcome, PromptOutcome::Success));
        assert_eq!(*reloaded.cached_key().unwrap(), *key);
    }
}
