//! An in-process implementation of `RemoteStore`.
//!
//! Note: this is compiled even in the "production" version of this app so that the whole app can
//! run top-to-bottom without a network connection (see `Mode::Local`). It holds a single JSON tree,
//! notifies subscribers whose node was touched by a change, and can optionally mirror the tree to a
//! JSON file so that state survives between CLI invocations.

use crate::api::push_key::PushKeys;
use crate::api::{tree, RemoteStore, StorePath, Subscription};
use crate::error::Res;
use crate::utils;
use anyhow::{bail, Context};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// See the module documentation.
#[derive(Clone, Default)]
pub struct LocalStore {
    inner: Arc<Mutex<Inner>>,
    keys: Arc<PushKeys>,
    file: Option<Arc<StoreFile>>,
}

#[derive(Default)]
struct Inner {
    tree: Value,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    committed: u64,
    faults: Faults,
}

struct Subscriber {
    id: u64,
    path: StorePath,
    sender: mpsc::UnboundedSender<Value>,
}

/// Failures that tests can arrange to happen on upcoming calls.
#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    fail_mutations: u32,
    hang_mutations: u32,
    commit_then_hang_mutations: u32,
    fail_subscriptions: bool,
}

/// Serializes writes of the tree to disk so that the last write always holds the latest tree.
struct StoreFile {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

enum Fault {
    None,
    Fail,
    Hang,
    CommitThenHang,
}

impl LocalStore {
    /// An empty store that lives only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with `tree`, e.g. `{"transactions": {"uid": {...}}}`.
    pub fn with_data(tree: Value) -> Self {
        let store = Self::new();
        store.lock().tree = tree;
        store
    }

    /// Opens a store that is mirrored to the JSON file at `path`, loading its contents if the file
    /// exists.
    pub async fn open(path: impl Into<PathBuf>) -> Res<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            utils::make_dir(parent).await?;
        }
        let tree: Option<Value> = utils::deserialize_if_exists(&path)
            .await
            .with_context(|| format!("Unable to load the local store from {}", path.display()))?;
        debug!("Opened the local store at {}", path.display());
        let mut store = Self::with_data(tree.unwrap_or(Value::Null));
        store.file = Some(Arc::new(StoreFile {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }));
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    /// Reads the node at `path` without subscribing.
    pub fn value_at(&self, path: &StorePath) -> Value {
        tree::value_at(&self.lock().tree, path)
    }

    /// The number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Makes the next `count` calls to `set_at` or `remove_at` fail.
    pub fn fail_next_mutations(&self, count: u32) {
        self.lock().faults.fail_mutations = count;
    }

    /// Makes the next `count` calls to `set_at` or `remove_at` never complete.
    pub fn hang_next_mutations(&self, count: u32) {
        self.lock().faults.hang_mutations = count;
    }

    /// Makes the next `count` calls to `set_at` or `remove_at` apply their change and then never
    /// complete, as when a write reaches the server but its reply is lost.
    pub fn commit_then_hang_next_mutations(&self, count: u32) {
        self.lock().faults.commit_then_hang_mutations = count;
    }

    /// The number of `set_at` and `remove_at` calls that changed the tree.
    pub fn committed_mutations(&self) -> u64 {
        self.lock().committed
    }

    /// Makes calls to `subscribe` fail while `fail` is true.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.lock().faults.fail_subscriptions = fail;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    fn take_fault(&self) -> Fault {
        let mut inner = self.lock();
        if inner.faults.hang_mutations > 0 {
            inner.faults.hang_mutations -= 1;
            Fault::Hang
        } else if inner.faults.commit_then_hang_mutations > 0 {
            inner.faults.commit_then_hang_mutations -= 1;
            Fault::CommitThenHang
        } else if inner.faults.fail_mutations > 0 {
            inner.faults.fail_mutations -= 1;
            Fault::Fail
        } else {
            Fault::None
        }
    }

    /// Writes `value` at `path` unless a fault says otherwise.
    async fn mutate(&self, path: &StorePath, value: Value, what: &str) -> Res<()> {
        match self.take_fault() {
            Fault::None => self.write(path, value).await,
            Fault::Fail => bail!("The local store was told to fail this {what}"),
            Fault::Hang => std::future::pending().await,
            Fault::CommitThenHang => {
                self.write(path, value).await?;
                std::future::pending().await
            }
        }
    }

    /// Writes `value` at `path` and notifies affected subscribers.
    async fn write(&self, path: &StorePath, value: Value) -> Res<()> {
        {
            let mut inner = self.lock();
            let before = tree::value_at(&inner.tree, path);
            if before == value {
                trace!("No change at '{path}'");
                return Ok(());
            }
            tree::set_at(&mut inner.tree, path, value);
            inner.committed += 1;
            inner.notify(path);
        }
        self.persist().await
    }

    async fn persist(&self) -> Res<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let _guard = file.write_lock.lock().await;
        let tree = self.lock().tree.clone();
        utils::serialize(&file.path, &tree)
            .await
            .with_context(|| format!("Unable to save the local store to {}", file.path.display()))
    }
}

impl Inner {
    fn notify(&mut self, changed: &StorePath) {
        let tree = &self.tree;
        self.subscribers.retain(|subscriber| {
            if !subscriber.path.is_affected_by(changed) {
                return true;
            }
            subscriber
                .sender
                .send(tree::value_at(tree, &subscriber.path))
                .is_ok()
        });
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unsubscribe(inner: Weak<Mutex<Inner>>, id: u64) {
    if let Some(inner) = inner.upgrade() {
        lock(&inner).subscribers.retain(|s| s.id != id);
        trace!("Removed local store subscriber {id}");
    }
}

#[async_trait::async_trait]
impl RemoteStore for LocalStore {
    async fn subscribe(&self, path: &StorePath) -> Res<Subscription<Value>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            if inner.faults.fail_subscriptions {
                bail!("The local store was told to fail subscriptions");
            }
            let id = inner.next_id;
            inner.next_id += 1;
            // the receiver is alive, so this cannot fail
            let _ = sender.send(tree::value_at(&inner.tree, path));
            inner.subscribers.push(Subscriber {
                id,
                path: path.clone(),
                sender,
            });
            id
        };
        debug!("Subscribed to '{path}' in the local store");
        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(receiver).on_unsubscribe(move || unsubscribe(weak, id)))
    }

    fn new_key(&self) -> String {
        self.keys.next()
    }

    async fn set_at(&self, path: &StorePath, record: Value) -> Res<()> {
        if record.is_null() {
            bail!("Cannot write an empty record to '{path}'");
        }
        self.mutate(path, record, "write").await?;
        debug!("Wrote '{path}' in the local store");
        Ok(())
    }

    async fn remove_at(&self, path: &StorePath) -> Res<()> {
        self.mutate(path, Value::Null, "removal").await?;
        debug!("Removed '{path}' from the local store");
        Ok(())
    }
}
