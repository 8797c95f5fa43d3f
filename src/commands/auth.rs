//! Account command handlers.
//!
//! This module implements the CLI commands for:
//! - `piggy register` - Create an account and sign in with it
//! - `piggy login` - Sign in with an existing account
//! - `piggy logout` - Sign out
//! - `piggy whoami` - Show who is signed in

use crate::api::{Identity, Mode};
use crate::app::App;
use crate::commands::{ready_timeout, Out};
use crate::{Config, Result};

/// Handles the `piggy register` command. On success the new account is signed in and the session
/// is saved, so later commands act as this user.
///
/// # Errors
/// The identity provider's message is returned verbatim, e.g. `EMAIL_EXISTS`.
pub async fn register(
    config: &Config,
    mode: Mode,
    email: &str,
    password: &str,
) -> Result<Out<Identity>> {
    let app = App::open(config, mode).await?;
    let identity = app.register(email, password).await?;
    Ok(Out::new(
        format!("Registered and logged in as {identity}"),
        identity,
    ))
}

/// Handles the `piggy login` command.
///
/// # Errors
/// The identity provider's message is returned verbatim, e.g. `INVALID_LOGIN_CREDENTIALS`.
pub async fn login(
    config: &Config,
    mode: Mode,
    email: &str,
    password: &str,
) -> Result<Out<Identity>> {
    let app = App::open(config, mode).await?;
    let identity = app.sign_in(email, password).await?;
    Ok(Out::new(format!("Logged in as {identity}"), identity))
}

/// Handles the `piggy logout` command. Signing out when nobody is signed in is not an error.
pub async fn logout(config: &Config, mode: Mode) -> Result<Out<()>> {
    let app = App::open(config, mode).await?;
    let state = app.session().wait_until_loaded(ready_timeout(config)).await?;
    app.sign_out().await?;
    Ok(match state.identity() {
        Some(identity) => format!("Logged out {identity}").into(),
        None => "Nobody was logged in".into(),
    })
}

/// Handles the `piggy whoami` command.
pub async fn whoami(config: &Config, mode: Mode) -> Result<Out<Option<Identity>>> {
    let app = App::open(config, mode).await?;
    let state = app.session().wait_until_loaded(ready_timeout(config)).await?;
    let identity = state.identity().cloned();
    let message = match &identity {
        Some(identity) => format!("Welcome, {identity}"),
        None => "Nobody is logged in, run 'piggy login' or 'piggy register'".to_string(),
    };
    Ok(Out::new(message, identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_register_whoami_logout() {
        let env = TestEnv::new().await;
        let config = env.config();

        let out = whoami(config, Mode::Local).await.unwrap();
        assert!(out.structure().unwrap().is_none());

        let out = register(config, Mode::Local, "Me@Example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(out.message(), "Registered and logged in as me@example.com");

        // a fresh app picks the saved session up
        let out = whoami(config, Mode::Local).await.unwrap();
        assert_eq!(out.message(), "Welcome, me@example.com");

        let out = logout(config, Mode::Local).await.unwrap();
        assert_eq!(out.message(), "Logged out me@example.com");
        let out = whoami(config, Mode::Local).await.unwrap();
        assert!(out.structure().unwrap().is_none());

        let out = login(config, Mode::Local, "me@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(out.message(), "Logged in as me@example.com");
    }

    #[tokio::test]
    async fn test_auth_errors_are_verbatim() {
        let env = TestEnv::new().await;
        let config = env.config();
        register(config, Mode::Local, "a@b.co", "secret1")
            .await
            .unwrap();

        let e = register(config, Mode::Local, "a@b.co", "secret1")
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Auth);
        assert_eq!(e.to_string(), "EMAIL_EXISTS");

        let e = login(config, Mode::Local, "a@b.co", "wrong-password")
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Auth);
        assert_eq!(e.to_string(), "INVALID_LOGIN_CREDENTIALS");
    }
}
