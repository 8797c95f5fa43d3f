//! Serialization and deserialization structures for files that the Firebase backends keep on disk.
//! - `session.json`: the signed-in user and the tokens that authorize requests on their behalf

use crate::api::Identity;
use crate::error::Res;
use crate::utils;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Represents a file that we want to `Serialize`, `Deserialize`, and read from memory in-between
/// serializations and deserialization. Basically we are just holding the `path` and the `data`
/// here.
#[derive(Default, Debug, Clone)]
pub(crate) struct File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    path: PathBuf,
    data: F,
}

impl<F> File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    /// Load data from a file, returning `None` if the file does not exist.
    pub(crate) async fn load_if_exists(path: impl Into<PathBuf>) -> Res<Option<Self>> {
        let path = path.into();
        let data: Option<F> = utils::deserialize_if_exists(&path).await?;
        Ok(data.map(|data| Self { path, data }))
    }

    /// Create a File instance with the given path and data
    pub(crate) fn new(path: impl Into<PathBuf>, data: F) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Save the current data to the file, readable only by the owner.
    pub(crate) async fn save(&self) -> Res<()> {
        if let Some(parent) = self.path.parent() {
            utils::make_dir(parent).await?;
        }
        utils::serialize(&self.path, &self.data)
            .await
            .context("Failed to save data to JSON")?;
        utils::make_private(&self.path)
    }

    /// Delete the file from disk. A file that is already gone is not an error.
    pub(crate) async fn delete(&self) -> Res<()> {
        utils::remove_file(&self.path).await
    }

    pub(crate) fn data(&self) -> &F {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut F {
        &mut self.data
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// What we keep of a Firebase Authentication sign-in: who the user is and the tokens for acting
/// on their behalf. The id token is short-lived (an hour) and is renewed with the refresh token.
///
/// Example:
/// ```json
/// {
///   "uid": "tQ3nF8cZ2bWk0Yr5mXpL7eHa1Vs4",
///   "email": "someone@example.com",
///   "id_token": "eyJhbGciOiJSUzI1NiIs...",
///   "refresh_token": "AMf-vBw...",
///   "expires_at": "2025-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct SessionData {
    uid: String,
    email: String,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl SessionData {
    pub(crate) fn new(
        uid: impl Into<String>,
        email: impl Into<String>,
        id_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
            id_token: id_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    pub(crate) fn identity(&self) -> Identity {
        Identity::new(&self.uid, &self.email)
    }

    pub(crate) fn id_token(&self) -> &str {
        &self.id_token
    }

    pub(crate) fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// True if the id token has expired or will within a minute.
    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + Duration::seconds(EXPIRY_BUFFER_SECS)
    }

    /// Replaces the tokens after a refresh.
    pub(crate) fn update(
        &mut self,
        id_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    ) {
        self.id_token = id_token;
        self.refresh_token = refresh_token;
        self.expires_at = expires_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session(expires_at: DateTime<Utc>) -> SessionData {
        SessionData::new("uid1", "a@b.co", "id-token", "refresh-token", expires_at)
    }

    #[test]
    fn test_expiry_buffer() {
        let now = Utc::now();
        assert!(session(now + Duration::seconds(30)).is_expired(now));
        assert!(session(now - Duration::seconds(1)).is_expired(now));
        assert!(!session(now + Duration::minutes(30)).is_expired(now));
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".secrets").join("session.json");
        assert!(File::<SessionData>::load_if_exists(&path)
            .await
            .unwrap()
            .is_none());

        let mut file = File::new(&path, session(Utc::now()));
        file.data_mut().update(
            "new-id".to_string(),
            "new-refresh".to_string(),
            Utc::now() + Duration::hours(1),
        );
        file.save().await.unwrap();

        let loaded = File::<SessionData>::load_if_exists(&path)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data(), file.data());
        assert_eq!(loaded.data().id_token(), "new-id");
        assert_eq!(loaded.data().identity(), Identity::new("uid1", "a@b.co"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(loaded.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        loaded.delete().await.unwrap();
        assert!(!path.exists());
        loaded.delete().await.unwrap();
    }
}
