//! An in-process implementation of `IdentityProvider` backed by a map of email/password accounts.
//!
//! Note: like `LocalStore`, this is compiled into the app so that it can run without network
//! access. Passwords are kept in plain text; it is not meant to protect anything. Rejections use
//! the same messages as Firebase Authentication so that callers see the same behavior in both
//! modes.

use crate::api::{Identity, IdentityProvider, Notifier, Subscription};
use crate::error::{ErrorType, Res};
use crate::{utils, Error, Result};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

/// See the module documentation.
#[derive(Default)]
pub struct LocalIdentity {
    state: Mutex<AccountsFile>,
    notifier: Notifier<Option<Identity>>,
    path: Option<PathBuf>,
    fail_changes: AtomicBool,
}

/// The persisted state: all accounts and who is signed in.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: BTreeMap<String, LocalAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current: Option<Identity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalAccount {
    uid: String,
    password: String,
}

impl LocalIdentity {
    /// A provider with no accounts that lives only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a provider that is mirrored to the JSON file at `path`, restoring its accounts and
    /// signed-in identity if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Res<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            utils::make_dir(parent).await?;
        }
        let state: Option<AccountsFile> = utils::deserialize_if_exists(&path)
            .await
            .with_context(|| format!("Unable to load local accounts from {}", path.display()))?;
        let state = state.unwrap_or_default();
        if let Some(identity) = &state.current {
            debug!("Restored the local session for {identity}");
        }
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
            ..Self::default()
        })
    }

    /// Makes `identity_changes` fail while `fail` is true.
    pub fn fail_identity_changes(&self, fail: bool) {
        self.fail_changes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, AccountsFile> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets the signed-in identity, notifying subscribers if it changed.
    async fn set_current(&self, identity: Option<Identity>) -> Res<()> {
        let changed = {
            let mut state = self.lock();
            let changed = state.current != identity;
            state.current = identity.clone();
            changed
        };
        if changed {
            self.notifier.notify(identity);
        }
        self.persist().await
    }

    async fn persist(&self) -> Res<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let state = self.lock().clone();
        utils::serialize(path, &state)
            .await
            .with_context(|| format!("Unable to save local accounts to {}", path.display()))?;
        utils::make_private(path)
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((user, domain)) => !user.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(auth_error("INVALID_EMAIL"));
    }
    Ok(email)
}

fn auth_error(message: &'static str) -> Error {
    Error::msg(ErrorType::Auth, message)
}

#[async_trait::async_trait]
impl IdentityProvider for LocalIdentity {
    async fn identity_changes(&self) -> Res<Subscription<Option<Identity>>> {
        if self.fail_changes.load(Ordering::SeqCst) {
            bail!("The local identity provider was told to fail subscriptions");
        }
        let current = self.lock().current.clone();
        Ok(self.notifier.subscribe(current))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(auth_error("MISSING_PASSWORD"));
        }
        let identity = {
            let state = self.lock();
            match state.accounts.get(&email) {
                Some(account) if account.password == password => {
                    Identity::new(account.uid.clone(), email.clone())
                }
                _ => return Err(auth_error("INVALID_LOGIN_CREDENTIALS")),
            }
        };
        self.set_current(Some(identity.clone()))
            .await
            .map_err(|e| Error::from_anyhow(e, ErrorType::Internal))?;
        info!("Signed in {identity} locally");
        Ok(identity)
    }

    async fn register(&self, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(auth_error("MISSING_PASSWORD"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(auth_error(
                "WEAK_PASSWORD : Password should be at least 6 characters",
            ));
        }
        let identity = {
            let mut state = self.lock();
            if state.accounts.contains_key(&email) {
                return Err(auth_error("EMAIL_EXISTS"));
            }
            let uid = Uuid::new_v4().simple().to_string();
            state.accounts.insert(
                email.clone(),
                LocalAccount {
                    uid: uid.clone(),
                    password: password.to_string(),
                },
            );
            Identity::new(uid, email)
        };
        self.set_current(Some(identity.clone()))
            .await
            .map_err(|e| Error::from_anyhow(e, ErrorType::Internal))?;
        info!("Registered {identity} locally");
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.set_current(None)
            .await
            .map_err(|e| Error::from_anyhow(e, ErrorType::Internal))
    }

    fn current(&self) -> Option<Identity> {
        self.lock().current.clone()
    }
}
