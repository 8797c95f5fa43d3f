use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the data directory, its subdirectories and an initial `config.json` that points at the
/// given Firebase project, along with default settings.
///
/// # Arguments
/// - `piggy_home` - The directory that will be the root of data directory, e.g. `$HOME/piggy`
/// - `database_url` - The URL of the Firebase Realtime Database, e.g.
///   https://my-project-default-rtdb.firebaseio.com
/// - `api_key` - The Web API key of the Firebase project, used to sign in.
///
/// # Errors
/// - Returns an error if the URL is invalid or any file operations fail.
pub async fn init(piggy_home: &Path, database_url: &str, api_key: &str) -> Result<Out<()>> {
    let config = Config::create(piggy_home, database_url, api_key)
        .await
        .context("Unable to create the data directory and configs")
        .pub_result(ErrorType::Config)?;
    Ok(format!(
        "Successfully created the piggy directory and config at {}",
        config.root().display()
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_then_load() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("piggy");
        let out = init(&home, "https://example.firebaseio.com", "key")
            .await
            .unwrap();
        assert!(out.message().contains("Successfully created"));
        let config = Config::load(&home).await.unwrap();
        assert_eq!(config.api_key(), "key");
    }

    #[tokio::test]
    async fn test_init_rejects_bad_url() {
        let dir = TempDir::new().unwrap();
        let e = init(&dir.path().join("piggy"), "not a url", "key")
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Config);
    }
}
