//! The two external boundaries of the app: the remote store that holds transactions and the
//! identity provider that signs users in. Each is a trait with two implementations, one that talks
//! to Firebase over REST and one that runs in-process for tests and offline use.

mod event_stream;
mod files;
mod firebase_identity;
mod firebase_store;
mod local_identity;
mod local_store;
mod path;
mod push_key;
mod retry;
mod subscription;
mod tree;

use crate::error::{ErrorType, IntoResult, Res};
use crate::{Config, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::debug;

pub use local_identity::LocalIdentity;
pub use local_store::LocalStore;
pub use path::{StorePath, TRANSACTIONS};
pub use retry::RetryPolicy;
pub use subscription::Subscription;

pub(crate) use files::{File, SessionData};
pub(crate) use firebase_identity::{Credentials, FirebaseIdentity};
pub(crate) use firebase_store::FirebaseStore;
pub(crate) use subscription::Notifier;

/// The environment variable that, when set and non-empty, switches the app to the local backends.
pub const TEST_MODE_ENV: &str = "PIGGY_IN_TEST_MODE";

const LOCAL_STORE_JSON: &str = "store.json";
const LOCAL_ACCOUNTS_JSON: &str = "accounts.json";

/// A path-addressed hierarchical document store with live subscriptions.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Subscribes to the node at `path`. The current value is delivered first, followed by the full
    /// value again after every change. An absent node is delivered as `Value::Null`.
    async fn subscribe(&self, path: &StorePath) -> anyhow::Result<Subscription<Value>>;

    /// A fresh key for a new child record. Keys are generated by the client and sort in the order
    /// they were made, so a write under one can be repeated without creating a second record.
    fn new_key(&self) -> String;

    /// Writes `record` at `path`, replacing whatever was there. Writing the same value twice
    /// leaves one record.
    async fn set_at(&self, path: &StorePath, record: Value) -> anyhow::Result<()>;

    /// Adds `record` as a new child of `path` under a generated key, and returns the key.
    async fn append(&self, path: &StorePath, record: Value) -> anyhow::Result<String> {
        let key = self.new_key();
        self.set_at(&path.child(&key)?, record).await?;
        Ok(key)
    }

    /// Removes the node at `path` and everything under it.
    async fn remove_at(&self, path: &StorePath) -> anyhow::Result<()>;
}

/// Signs users in and out and reports who is signed in.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subscribes to changes of the signed-in identity. The first notification reports the
    /// identity as it is when the subscription starts.
    async fn identity_changes(&self) -> anyhow::Result<Subscription<Option<Identity>>>;

    /// Signs in an existing user. Rejections are `ErrorType::Auth` with the provider's message.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;

    /// Creates a user and signs them in. Rejections are `ErrorType::Auth`.
    async fn register(&self, email: &str, password: &str) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;

    /// The signed-in identity, if any.
    fn current(&self) -> Option<Identity>;
}

/// An authenticated user.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Identity {
    uid: String,
    email: String,
}

impl Identity {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
        }
    }

    /// The user's unique id, which scopes their data in the remote store.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.email)
    }
}

/// Selects the backends.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Firebase Realtime Database and Firebase Authentication over REST.
    #[default]
    Firebase,
    /// In-process backends that keep their state under `$PIGGY_HOME/.test`.
    Local,
}

serde_plain::derive_display_from_serialize!(Mode);
serde_plain::derive_fromstr_from_deserialize!(Mode);

impl Mode {
    /// `Mode::Local` when `PIGGY_IN_TEST_MODE` is set and non-empty, otherwise `Mode::Firebase`.
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(value) if !value.is_empty() => Mode::Local,
            _ => Mode::Firebase,
        }
    }
}

/// The remote store and identity provider that the app runs against.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn RemoteStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Builds the backends for `mode`. Firebase backends share one set of credentials so that store
/// requests are authorized as the signed-in user.
pub async fn backends(config: &Config, mode: Mode) -> Result<Backends> {
    debug!("Creating {mode} backends");
    let backends = match mode {
        Mode::Firebase => firebase_backends(config).await,
        Mode::Local => local_backends(config).await,
    };
    backends.pub_result(ErrorType::Config)
}

async fn firebase_backends(config: &Config) -> Res<Backends> {
    // streams stay open indefinitely, so only connecting is bounded here and each plain request
    // sets its own timeout
    let timeout = config.request_timeout();
    let http = reqwest::Client::builder()
        .connect_timeout(timeout)
        .build()
        .context("Unable to create the HTTP client")?;
    let credentials = Credentials::load(
        http.clone(),
        config.api_key(),
        config.session_path(),
        timeout,
    )
    .await
    .context("Unable to load the saved session")?;
    let store = FirebaseStore::new(http, config.database_url(), credentials.clone(), timeout)?;
    let identity = FirebaseIdentity::new(credentials);
    Ok(Backends {
        store: Arc::new(store),
        identity: Arc::new(identity),
    })
}

async fn local_backends(config: &Config) -> Res<Backends> {
    let dir = config.test_dir();
    let store = LocalStore::open(dir.join(LOCAL_STORE_JSON)).await?;
    let identity = LocalIdentity::open(dir.join(LOCAL_ACCOUNTS_JSON)).await?;
    Ok(Backends {
        store: Arc::new(store),
        identity: Arc::new(identity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Local.to_string(), "local");
        assert_eq!("firebase".parse::<Mode>().unwrap(), Mode::Firebase);
    }

    #[test]
    fn test_identity_display() {
        let identity = Identity::new("u1", "a@b.co");
        assert_eq!(identity.to_string(), "a@b.co");
        assert_eq!(identity.uid(), "u1");
    }

    #[tokio::test]
    async fn test_local_backends_persist_under_test_dir() {
        let env = crate::test::TestEnv::new().await;
        let backends = backends(env.config(), Mode::Local).await.unwrap();
        let identity = backends.identity.register("a@b.co", "secret1").await.unwrap();
        let path = StorePath::transactions(identity.uid()).unwrap();
        backends
            .store
            .append(&path, serde_json::json!({"amount": "1"}))
            .await
            .unwrap();
        assert!(env.config().test_dir().join(LOCAL_STORE_JSON).is_file());
        assert!(env.config().test_dir().join(LOCAL_ACCOUNTS_JSON).is_file());
    }
}
