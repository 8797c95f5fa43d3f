//! The session gate: tracks who is signed in, and whether that is known yet.
//!
//! At start-up the identity provider has not yet said whether anyone is signed in, so the state
//! begins as `loading`. The gate subscribes to identity changes exactly once; the first
//! notification (and every later one) sets the identity and clears `loading`.

use crate::api::{Identity, IdentityProvider};
use crate::error::ErrorType;
use crate::{Error, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A snapshot of the session.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SessionState {
    identity: Option<Identity>,
    loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            identity: None,
            loading: true,
        }
    }
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// True until the identity provider has reported for the first time.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// True once loading is over and nobody is signed in.
    pub fn is_signed_out(&self) -> bool {
        !self.loading && self.identity.is_none()
    }
}

/// See the module documentation. The background task ends when the gate is dropped.
pub struct SessionGate {
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionGate {
    /// Subscribes to `provider` and starts tracking the session. If the subscription cannot be
    /// made, this is logged and the gate stays in the loading state.
    pub async fn start(provider: &dyn IdentityProvider) -> Self {
        let (sender, state) = watch::channel(SessionState::default());
        let task = match provider.identity_changes().await {
            Ok(mut changes) => tokio::spawn(async move {
                while let Some(identity) = changes.next().await {
                    match &identity {
                        Some(identity) => info!("User logged in: {}", identity.email()),
                        None => info!("User logged out"),
                    }
                    let next = SessionState {
                        identity,
                        loading: false,
                    };
                    if sender.send(next).is_err() {
                        break;
                    }
                }
                debug!("Stopped watching identity changes");
            }),
            Err(e) => {
                error!("Unable to watch for identity changes: {e:#}");
                // keep the sender alive so that readers keep seeing `loading`
                tokio::spawn(async move {
                    sender.closed().await;
                })
            }
        };
        Self { state, task }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// A receiver that is notified whenever the session changes.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits until the identity provider has reported, giving up after `timeout` with
    /// `ErrorType::Timeout`. Loading itself never times out; this only bounds the wait.
    pub async fn wait_until_loaded(&self, timeout: Duration) -> Result<SessionState> {
        let mut state = self.state.clone();
        let wait = state.wait_for(|s| !s.loading);
        let outcome = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(loaded)) => Ok(loaded.clone()),
            Ok(Err(_)) => Err(Error::msg(
                ErrorType::Internal,
                "The session stopped updating before it finished loading",
            )),
            Err(_) => Err(Error::msg(
                ErrorType::Timeout,
                format!(
                    "The session was still loading after {}ms",
                    timeout.as_millis()
                ),
            )),
        };
        outcome
    }
}

impl Drop for SessionGate {
    fn drop(&mut self) {
        self.task.abort();
    }
}
