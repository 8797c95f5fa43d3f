//! Implements `RemoteStore` with the Firebase Realtime Database REST API.
//!
//! Every node is addressable as `{database_url}/{path}.json`. Records are written with `PUT` under a
//! push key generated here, so a retried write lands on the same node. Nodes are removed with
//! `DELETE`, and watched by holding a `GET` open with `Accept: text/event-stream`, which streams
//! `put` and `patch` events relative to the watched node.

use crate::api::event_stream::{EventParser, StreamEvent};
use crate::api::push_key::PushKeys;
use crate::api::{Credentials, RemoteStore, StorePath, Subscription};
use crate::error::Res;
use anyhow::{bail, Context};
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use url::Url;

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// See the module documentation.
#[derive(Clone)]
pub(crate) struct FirebaseStore {
    http: reqwest::Client,
    base: Url,
    credentials: Credentials,
    timeout: Duration,
    keys: Arc<PushKeys>,
}

/// Why reading an event stream stopped.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum StreamEnd {
    /// The subscriber went away.
    Unsubscribed,
    /// The server refused to keep serving the node.
    Cancelled,
    /// The connection dropped or the token expired; open a new one.
    Reconnect,
}

impl FirebaseStore {
    pub(crate) fn new(
        http: reqwest::Client,
        database_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Res<Self> {
        let mut base = Url::parse(database_url)
            .with_context(|| format!("The database URL '{database_url}' is not valid"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http,
            base,
            credentials,
            timeout,
            keys: Arc::default(),
        })
    }

    /// The REST URL of the node at `path`, authorized with `id_token` if one is given.
    fn url(&self, path: &StorePath, id_token: Option<&str>) -> Res<Url> {
        let mut url = self
            .base
            .join(&format!("{path}.json"))
            .with_context(|| format!("Unable to build the URL for '{path}'"))?;
        if let Some(token) = id_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    async fn authorized_url(&self, path: &StorePath) -> Res<Url> {
        let token = self.credentials.id_token().await?;
        self.url(path, token.as_deref())
    }

    /// Opens an event stream on `path`.
    async fn open_stream(&self, path: &StorePath) -> Res<reqwest::Response> {
        let url = self.authorized_url(path).await?;
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .with_context(|| format!("Unable to open a stream on '{path}'"))?;
        check_status(response, path).await
    }

    /// Keeps a stream on `path` open, reconnecting as needed, and sends the full value of the node
    /// to `sender` after every change. `response` is the already-opened first connection.
    async fn run_stream(
        self,
        path: StorePath,
        sender: mpsc::UnboundedSender<Value>,
        response: reqwest::Response,
    ) {
        let mut node = Value::Null;
        let mut delivered = false;
        let mut next = Some(response);
        let mut attempt = 0u32;
        loop {
            let response = match next.take() {
                Some(response) => response,
                None => match self.open_stream(&path).await {
                    Ok(response) => {
                        debug!("Reconnected the stream on '{path}'");
                        attempt = 0;
                        response
                    }
                    Err(e) => {
                        let delay = reconnect_delay(attempt);
                        warn!("Unable to reconnect to '{path}', retrying in {delay:?}: {e:#}");
                        attempt = attempt.saturating_add(1);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                },
            };

            match read_stream(response, &path, &mut node, &mut delivered, &sender).await {
                StreamEnd::Unsubscribed => {
                    debug!("Stopped streaming '{path}'");
                    return;
                }
                StreamEnd::Cancelled => {
                    warn!("The server cancelled the stream on '{path}'");
                    return;
                }
                StreamEnd::Reconnect => {
                    if sender.is_closed() {
                        return;
                    }
                    tokio::time::sleep(reconnect_delay(attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

async fn read_stream(
    mut response: reqwest::Response,
    path: &StorePath,
    node: &mut Value,
    delivered: &mut bool,
    sender: &mpsc::UnboundedSender<Value>,
) -> StreamEnd {
    let mut parser = EventParser::default();
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!("The stream on '{path}' was closed by the server");
                return StreamEnd::Reconnect;
            }
            Err(e) => {
                warn!("The stream on '{path}' failed: {e}");
                return StreamEnd::Reconnect;
            }
        };
        for server_event in parser.push(&chunk) {
            let event = match StreamEvent::parse(&server_event) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Ignoring a malformed event on '{path}': {e:#}");
                    continue;
                }
            };
            trace!("Event on '{path}': {event:?}");
            match event {
                StreamEvent::Put { .. } | StreamEvent::Patch { .. } => {
                    let changed = event.apply(node);
                    if changed || !*delivered {
                        if sender.send(node.clone()).is_err() {
                            return StreamEnd::Unsubscribed;
                        }
                        *delivered = true;
                    }
                }
                StreamEvent::KeepAlive => {
                    if sender.is_closed() {
                        return StreamEnd::Unsubscribed;
                    }
                }
                StreamEvent::Cancel => return StreamEnd::Cancelled,
                StreamEvent::AuthRevoked => {
                    debug!("The id token for the stream on '{path}' expired");
                    return StreamEnd::Reconnect;
                }
                StreamEvent::Other(name) => debug!("Ignoring '{name}' event on '{path}'"),
            }
        }
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RECONNECT_MAX_DELAY)
}

/// Passes a successful response through and turns anything else into an error with the body.
async fn check_status(response: reqwest::Response, path: &StorePath) -> Res<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read response body".to_string());
    bail!("The request for '{path}' failed with status {status}: {body}")
}

#[async_trait::async_trait]
impl RemoteStore for FirebaseStore {
    async fn subscribe(&self, path: &StorePath) -> Res<Subscription<Value>> {
        let response = self.open_stream(path).await?;
        debug!("Subscribed to '{path}'");
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.clone().run_stream(path.clone(), sender, response));
        Ok(Subscription::new(receiver).on_unsubscribe(move || task.abort()))
    }

    fn new_key(&self) -> String {
        self.keys.next()
    }

    async fn set_at(&self, path: &StorePath, record: Value) -> Res<()> {
        let url = self.authorized_url(path).await?;
        let response = self
            .http
            .put(url)
            .timeout(self.timeout)
            .json(&record)
            .send()
            .await
            .with_context(|| format!("Unable to send the record to '{path}'"))?;
        check_status(response, path).await?;
        debug!("Wrote '{path}'");
        Ok(())
    }

    async fn remove_at(&self, path: &StorePath) -> Res<()> {
        let url = self.authorized_url(path).await?;
        let response = self
            .http
            .delete(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Unable to remove '{path}'"))?;
        check_status(response, path).await?;
        debug!("Removed '{path}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(database_url: &str) -> (TempDir, FirebaseStore) {
        let dir = TempDir::new().unwrap();
        let http = reqwest::Client::new();
        let credentials = Credentials::load(
            http.clone(),
            "key",
            dir.path().join("session.json"),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let store =
            FirebaseStore::new(http, database_url, credentials, Duration::from_secs(1)).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_urls() {
        let (_dir, store) = store("https://piggy-default-rtdb.firebaseio.com").await;
        let path = StorePath::record("uid1", "-Nabc").unwrap();
        assert_eq!(
            store.url(&path, None).unwrap().as_str(),
            "https://piggy-default-rtdb.firebaseio.com/transactions/uid1/-Nabc.json"
        );
        assert_eq!(
            store.url(&path, Some("tok")).unwrap().as_str(),
            "https://piggy-default-rtdb.firebaseio.com/transactions/uid1/-Nabc.json?auth=tok"
        );
        // signed out, so no token is attached
        assert_eq!(
            store.authorized_url(&path).await.unwrap().query(),
            None
        );
    }

    #[tokio::test]
    async fn test_url_keeps_base_path() {
        let (_dir, store) = store("https://example.com/db").await;
        let path = StorePath::transactions("u").unwrap();
        assert_eq!(
            store.url(&path, None).unwrap().as_str(),
            "https://example.com/db/transactions/u.json"
        );
    }

    #[tokio::test]
    async fn test_bad_url() {
        let dir = TempDir::new().unwrap();
        let http = reqwest::Client::new();
        let credentials = Credentials::load(
            http.clone(),
            "key",
            dir.path().join("session.json"),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(FirebaseStore::new(http, "not a url", credentials, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_new_keys_are_distinct_and_ordered() {
        let (_dir, store) = store("https://example.com").await;
        let first = store.new_key();
        let second = store.new_key();
        assert_eq!(first.len(), 20);
        assert!(first < second);
    }

    #[test]
    fn test_reconnect_delay() {
        assert_eq!(reconnect_delay(0), Duration::from_millis(500));
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(100), RECONNECT_MAX_DELAY);
    }
}
