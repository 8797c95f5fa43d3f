//! Implements `IdentityProvider` with the Firebase Authentication REST API.
//!
//! A successful sign-in yields an id token (valid for an hour) and a refresh token. Both are kept
//! in `Credentials`, which is shared with `FirebaseStore` so that database requests carry the
//! signed-in user's id token, and saved to `session.json` so the session survives restarts.

use crate::api::{File, Identity, IdentityProvider, Notifier, SessionData, Subscription};
use crate::error::{ErrorType, Res};
use crate::{Error, Result};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const IDENTITY_TOOLKIT: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN: &str = "https://securetoken.googleapis.com/v1/token";

/// The signed-in session shared by the Firebase backends.
#[derive(Clone)]
pub(crate) struct Credentials {
    inner: Arc<CredentialsInner>,
}

struct CredentialsInner {
    http: reqwest::Client,
    api_key: String,
    timeout: std::time::Duration,
    session_path: PathBuf,
    session: Mutex<Option<File<SessionData>>>,
    /// Held while refreshing so that concurrent callers wait for one refresh.
    refresh_lock: tokio::sync::Mutex<()>,
    notifier: Notifier<Option<Identity>>,
}

impl Credentials {
    /// Restores the session saved at `session_path`, if there is one.
    pub(crate) async fn load(
        http: reqwest::Client,
        api_key: &str,
        session_path: PathBuf,
        timeout: std::time::Duration,
    ) -> Res<Self> {
        let session = File::<SessionData>::load_if_exists(&session_path).await?;
        if let Some(file) = &session {
            debug!("Restored the session for {}", file.data().identity());
        }
        Ok(Self {
            inner: Arc::new(CredentialsInner {
                http,
                api_key: api_key.to_string(),
                timeout,
                session_path,
                session: Mutex::new(session),
                refresh_lock: tokio::sync::Mutex::new(()),
                notifier: Notifier::default(),
            }),
        })
    }

    pub(crate) fn identity(&self) -> Option<Identity> {
        self.lock().as_ref().map(|file| file.data().identity())
    }

    /// Returns an id token for the signed-in user, refreshing it first if it is about to expire.
    /// Returns `None` when nobody is signed in.
    pub(crate) async fn id_token(&self) -> Res<Option<String>> {
        let _refreshing = self.inner.refresh_lock.lock().await;
        let Some(session) = self.lock().as_ref().map(|file| file.data().clone()) else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now()) {
            return Ok(Some(session.id_token().to_string()));
        }

        debug!("Refreshing the id token for {}", session.identity());
        let refreshed = match self.refresh(session.refresh_token()).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                if e.downcast_ref::<Error>()
                    .is_some_and(|e| e.error_type() == ErrorType::Auth)
                {
                    warn!("The session for {} can no longer be refreshed", session.identity());
                    self.clear().await?;
                }
                return Err(e);
            }
        };
        let id_token = refreshed.id_token.clone();
        let file = {
            let mut guard = self.lock();
            let Some(file) = guard.as_mut() else {
                return Ok(None);
            };
            file.data_mut().update(
                refreshed.id_token,
                refreshed.refresh_token,
                expires_at(&refreshed.expires_in),
            );
            file.clone()
        };
        file.save().await.context("Unable to save the refreshed session")?;
        Ok(Some(id_token))
    }

    async fn refresh(&self, refresh_token: &str) -> Res<RefreshResponse> {
        let response = self
            .inner
            .http
            .post(SECURE_TOKEN)
            .timeout(self.inner.timeout)
            .query(&[("key", self.inner.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .context("Failed to send the token refresh request")?;
        parse_response(response).await
    }

    /// Calls an Identity Toolkit `accounts:*` endpoint with an email and password.
    async fn password_request(&self, endpoint: &str, email: &str, password: &str) -> Result<Identity> {
        let url = format!("{IDENTITY_TOOLKIT}/accounts:{endpoint}");
        let response = self
            .inner
            .http
            .post(&url)
            .timeout(self.inner.timeout)
            .query(&[("key", self.inner.api_key.as_str())])
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await
            .with_context(|| format!("Failed to send the {endpoint} request"))
            .map_err(|e| Error::new(ErrorType::Store, e))?;
        let body: PasswordResponse = parse_response(response)
            .await
            .map_err(|e| Error::from_anyhow(e, ErrorType::Store))?;

        let session = SessionData::new(
            body.local_id,
            body.email,
            body.id_token,
            body.refresh_token,
            expires_at(&body.expires_in),
        );
        let identity = session.identity();
        self.store(session)
            .await
            .map_err(|e| Error::from_anyhow(e, ErrorType::Internal))?;
        Ok(identity)
    }

    /// Saves `session` as the signed-in session and notifies subscribers.
    async fn store(&self, session: SessionData) -> Res<()> {
        let identity = session.identity();
        let file = File::new(&self.inner.session_path, session);
        *self.lock() = Some(file.clone());
        file.save().await?;
        self.inner.notifier.notify(Some(identity));
        Ok(())
    }

    /// Forgets the signed-in session and notifies subscribers.
    async fn clear(&self) -> Res<()> {
        let previous = self.lock().take();
        if let Some(file) = previous {
            file.delete().await?;
            self.inner.notifier.notify(None);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<File<SessionData>>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// See the module documentation.
pub(crate) struct FirebaseIdentity {
    credentials: Credentials,
}

impl FirebaseIdentity {
    pub(crate) fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn identity_changes(&self) -> Res<Subscription<Option<Identity>>> {
        Ok(self
            .credentials
            .inner
            .notifier
            .subscribe(self.credentials.identity()))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let identity = self
            .credentials
            .password_request("signInWithPassword", email.trim(), password)
            .await?;
        info!("Signed in {identity}");
        Ok(identity)
    }

    async fn register(&self, email: &str, password: &str) -> Result<Identity> {
        let identity = self
            .credentials
            .password_request("signUp", email.trim(), password)
            .await?;
        info!("Registered {identity}");
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.credentials
            .clear()
            .await
            .map_err(|e| Error::from_anyhow(e, ErrorType::Internal))
    }

    fn current(&self) -> Option<Identity> {
        self.credentials.identity()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    email: String,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

/// The error body returned by Google APIs, e.g.
/// `{"error": {"code": 400, "message": "EMAIL_EXISTS"}}`.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Deserializes a successful response. A rejection with a provider message becomes an
/// `ErrorType::Auth` error carrying that message verbatim.
async fn parse_response<T>(response: reqwest::Response) -> Res<T>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    let body = response
        .text()
        .await
        .context("Unable to read the authentication response")?;
    if status.is_success() {
        return serde_json::from_str(&body).context("Unable to parse the authentication response");
    }
    Err(rejection(status, &body).into())
}

fn rejection(status: reqwest::StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) if status.is_client_error() => Error::msg(ErrorType::Auth, parsed.error.message),
        _ => Error::msg(
            ErrorType::Store,
            format!("Authentication request failed with status {status}: {body}"),
        ),
    }
}

/// Converts `expiresIn` (seconds, as a string) into a timestamp.
fn expires_at(expires_in: &str) -> DateTime<Utc> {
    let seconds = expires_in.trim().parse::<i64>().unwrap_or(0);
    Utc::now() + Duration::seconds(seconds)
}
