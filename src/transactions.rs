//! The transaction state manager: owns the signed-in user's collection of transactions.
//!
//! The collection is only ever changed by snapshots arriving from the remote store. Adding and
//! deleting send a request to the store and leave the collection alone; the store's next snapshot
//! carries the change back. Subscribing for a user replaces any earlier subscription, and a
//! snapshot from a replaced subscription is never applied.

use crate::api::{Identity, RemoteStore, RetryPolicy, StorePath};
use crate::clock::Clock;
use crate::error::{ErrorType, IntoResult};
use crate::model::{NewTransaction, Transactions};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

const NOT_LOGGED_IN: &str = "User is not logged in.";

/// What the manager currently holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionsState {
    user_id: Option<String>,
    synced: bool,
    transactions: Transactions,
}

impl TransactionsState {
    /// The user whose transactions these are.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// True once at least one snapshot has arrived for `user_id`.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn transactions(&self) -> &Transactions {
        &self.transactions
    }
}

/// See the module documentation.
pub struct TransactionManager {
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    state: Arc<watch::Sender<TransactionsState>>,
    /// Bumped by every `subscribe` and `reset`, so that older subscriptions can tell they are stale.
    generation: Arc<AtomicU64>,
    active: Mutex<Option<ActiveSubscription>>,
}

struct ActiveSubscription {
    user_id: String,
    task: JoinHandle<()>,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        let (state, _) = watch::channel(TransactionsState::default());
        Self {
            store,
            clock,
            retry,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Starts following `transactions/{user_id}`, replacing any earlier subscription. If the user
    /// differs from the one before, the collection is emptied right away so that one user's
    /// transactions are never shown to another.
    ///
    /// If the remote store cannot be subscribed to, the error is logged and returned, and the
    /// collection is left as it is.
    pub async fn subscribe(&self, user_id: &str) -> Result<()> {
        let path = StorePath::transactions(user_id).pub_result(ErrorType::Validation)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_active();
        self.state.send_if_modified(|state| {
            if state.user_id.as_deref() == Some(user_id) {
                return false;
            }
            *state = TransactionsState {
                user_id: Some(user_id.to_string()),
                ..TransactionsState::default()
            };
            true
        });

        let store = &self.store;
        let subscribe_path = &path;
        let mut subscription = match self
            .retry
            .run("subscribe to transactions", move || {
                store.subscribe(subscribe_path)
            })
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Unable to subscribe to the transactions of {user_id}: {e}");
                return Err(e);
            }
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("The subscription to '{path}' was replaced before it started");
            return Ok(());
        }

        let state = self.state.clone();
        let current = self.generation.clone();
        let task = tokio::spawn(async move {
            while let Some(value) = subscription.next().await {
                let transactions = Transactions::from_snapshot(&value);
                let count = transactions.len();
                let applied = state.send_if_modified(|state| {
                    if current.load(Ordering::SeqCst) != generation {
                        return false;
                    }
                    state.transactions = transactions;
                    state.synced = true;
                    true
                });
                if !applied {
                    break;
                }
                trace!("Applied a snapshot of {count} transaction(s) from '{path}'");
            }
            debug!("Stopped following '{path}'");
        });

        let mut active = self.lock_active();
        if self.generation.load(Ordering::SeqCst) != generation {
            // replaced while spawning
            task.abort();
            return Ok(());
        }
        *active = Some(ActiveSubscription {
            user_id: user_id.to_string(),
            task,
        });
        debug!("Following the transactions of {user_id}");
        Ok(())
    }

    /// Unsubscribes and empties the collection, e.g. after sign-out.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_active();
        self.state.send_if_modified(|state| {
            if *state == TransactionsState::default() {
                return false;
            }
            *state = TransactionsState::default();
            true
        });
    }

    /// Records a new expense for the signed-in user, dated today, and returns its id. The id is
    /// chosen before the first attempt and every retry writes under it, so one call creates at most
    /// one record even when an attempt times out after the store applied it. The collection is not
    /// changed here; the next snapshot includes the record.
    pub async fn add(
        &self,
        identity: Option<&Identity>,
        transaction: NewTransaction,
    ) -> Result<String> {
        let Some(identity) = identity else {
            error!("Cannot add a transaction: {NOT_LOGGED_IN}");
            return Err(Error::msg(ErrorType::Unauthenticated, NOT_LOGGED_IN));
        };
        let id = self.store.new_key();
        let path = StorePath::record(identity.uid(), &id).pub_result(ErrorType::Internal)?;
        let record = transaction.into_record(self.clock.today());
        let value = serde_json::to_value(&record).pub_result(ErrorType::Internal)?;

        let store = &self.store;
        let record_path = &path;
        match self
            .retry
            .run("add a transaction", move || store.set_at(record_path, value.clone()))
            .await
        {
            Ok(()) => {
                info!("Added transaction {id}");
                Ok(id)
            }
            Err(e) => {
                error!("Error adding transaction: {e}");
                Err(e)
            }
        }
    }

    /// Deletes exactly the record `transactions/{uid}/{id}`. On failure the collection is left as
    /// it is and the error is returned.
    pub async fn delete(&self, identity: Option<&Identity>, id: &str) -> Result<()> {
        let Some(identity) = identity else {
            error!("Cannot delete a transaction: {NOT_LOGGED_IN}");
            return Err(Error::msg(ErrorType::Unauthenticated, NOT_LOGGED_IN));
        };
        let path = StorePath::record(identity.uid(), id).pub_result(ErrorType::Validation)?;

        let store = &self.store;
        let record_path = &path;
        match self
            .retry
            .run("delete a transaction", move || store.remove_at(record_path))
            .await
        {
            Ok(()) => {
                info!("Deleted transaction {id}");
                Ok(())
            }
            Err(e) => {
                error!("Error deleting transaction {id}: {e}");
                Err(e)
            }
        }
    }

    /// The current collection.
    pub fn snapshot(&self) -> Transactions {
        self.state.borrow().transactions.clone()
    }

    pub fn state(&self) -> TransactionsState {
        self.state.borrow().clone()
    }

    /// A receiver that is notified whenever the collection changes.
    pub fn watch(&self) -> watch::Receiver<TransactionsState> {
        self.state.subscribe()
    }

    /// The user currently followed, if any.
    pub fn active_user(&self) -> Option<String> {
        self.lock_active().as_ref().map(|a| a.user_id.clone())
    }

    /// Waits for the first snapshot of the followed user, giving up after `timeout`.
    pub async fn wait_synced(&self, timeout: Duration) -> Result<Transactions> {
        let mut receiver = self.state.subscribe();
        let wait = receiver.wait_for(|state| state.synced);
        let outcome = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => Ok(state.transactions.clone()),
            Ok(Err(_)) => Err(Error::msg(
                ErrorType::Internal,
                "The transaction state was dropped",
            )),
            Err(_) => Err(Error::msg(
                ErrorType::Timeout,
                format!(
                    "No transactions arrived from the remote store within {}ms",
                    timeout.as_millis()
                ),
            )),
        };
        outcome
    }

    fn stop_active(&self) {
        if let Some(previous) = self.lock_active().take() {
            previous.task.abort();
            debug!("Stopped following the transactions of {}", previous.user_id);
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSubscription>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.stop_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LocalStore;
    use crate::clock::FixedClock;
    use crate::model::Amount;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 16).unwrap()
    }

    fn manager(store: &LocalStore) -> TransactionManager {
        TransactionManager::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(today())),
            RetryPolicy::new(Duration::from_millis(200), 0),
        )
    }

    fn alice() -> Identity {
        Identity::new("alice", "alice@example.com")
    }

    fn seeded() -> LocalStore {
        LocalStore::with_data(json!({
            "transactions": {
                "alice": {
                    "a": {"amount": "10", "category": "Dining", "date": "2024-10-14"},
                    "b": {"amount": "20", "date": "2024-10-15"},
                    "c": {"amount": "30", "date": "2024-10-16"}
                },
                "bob": {
                    "x": {"amount": "99", "date": "2024-10-16"}
                }
            }
        }))
    }

    async fn wait_for_ids(manager: &TransactionManager, ids: &[&str]) {
        let mut watch = manager.watch();
        let expected: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        tokio::time::timeout(
            WAIT,
            watch.wait_for(|state| {
                let mut found: Vec<String> = state
                    .transactions()
                    .iter()
                    .map(|t| t.id().to_string())
                    .collect();
                found.sort();
                state.is_synced() && found == expected
            }),
        )
        .await
        .unwrap()
        .unwrap();
    }

    /// Aborted tasks release their subscriptions once the runtime gets to them.
    async fn wait_for_subscribers(store: &LocalStore, count: usize) {
        tokio::time::timeout(WAIT, async {
            while store.subscriber_count() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_loads_snapshot() {
        let store = seeded();
        let manager = manager(&store);
        manager.subscribe("alice").await.unwrap();
        let transactions = manager.wait_synced(WAIT).await.unwrap();
        assert_eq!(transactions.len(), 3);
        assert_eq!(manager.active_user().as_deref(), Some("alice"));
        assert_eq!(manager.state().user_id(), Some("alice"));
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let store = LocalStore::new();
        let manager = manager(&store);
        manager.subscribe("nobody").await.unwrap();
        let transactions = manager.wait_synced(WAIT).await.unwrap();
        assert!(transactions.is_empty());
    }

    #[tokio::test]
    async fn test_wait_synced_times_out_without_subscription() {
        let store = seeded();
        let manager = manager(&store);
        let e = manager
            .wait_synced(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Timeout);
    }

    #[tokio::test]
    async fn test_add_arrives_through_snapshot() {
        let store = LocalStore::new();
        let manager = manager(&store);
        manager.subscribe("alice").await.unwrap();
        manager.wait_synced(WAIT).await.unwrap();

        let new = NewTransaction::new(Amount::new(Decimal::new(1250, 2)), Some("Dining"), None)
            .unwrap();
        let id = manager.add(Some(&alice()), new).await.unwrap();
        wait_for_ids(&manager, &[id.as_str()]).await;

        let snapshot = manager.snapshot();
        let added = snapshot.get(&id).unwrap();
        assert_eq!(added.amount().value(), Some(Decimal::new(1250, 2)));
        assert_eq!(added.category(), Some("Dining"));
        assert_eq!(added.date(), Some(today()));

        let stored = store.value_at(&StorePath::record("alice", &id).unwrap());
        assert_eq!(stored["date"], json!("2024-10-16"));
    }

    #[tokio::test]
    async fn test_delete_removes_only_that_record() {
        let store = seeded();
        let manager = manager(&store);
        manager.subscribe("alice").await.unwrap();
        wait_for_ids(&manager, &["a", "b", "c"]).await;

        manager.delete(Some(&alice()), "b").await.unwrap();
        wait_for_ids(&manager, &["a", "c"]).await;

        // other users are untouched
        assert_eq!(
            store.value_at(&StorePath::record("bob", "x").unwrap()),
            json!({"amount": "99", "date": "2024-10-16"})
        );
    }

    #[tokio::test]
    async fn test_mutations_require_identity() {
        let store = seeded();
        let manager = manager(&store);
        manager.subscribe("alice").await.unwrap();
        wait_for_ids(&manager, &["a", "b", "c"]).await;

        // an injected failure would be consumed by any remote call
        store.fail_next_mutations(1);
        let e = manager.delete(None, "b").await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Unauthenticated);
        assert_eq!(e.to_string(), "User is not logged in.");

        let new = NewTransaction::parse("5", None, None).unwrap();
        let e = manager.add(None, new).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Unauthenticated);

        // the failure is still pending, so no remote call was made
        assert!(store
            .remove_at(&StorePath::record("alice", "zzz").unwrap())
            .await
            .is_err());
        assert_eq!(manager.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_collection() {
        let store = seeded();
        let manager = manager(&store);
        manager.subscribe("alice").await.unwrap();
        wait_for_ids(&manager, &["a", "b", "c"]).await;

        store.fail_next_mutations(1);
        let e = manager.delete(Some(&alice()), "b").await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Store);
        assert_eq!(manager.snapshot().len(), 3);
        assert!(manager.snapshot().get("b").is_some());
    }

    #[tokio::test]
    async fn test_hung_add_times_out() {
        let store = LocalStore::new();
        let manager = manager(&store);
        store.hang_next_mutations(1);
        let new = NewTransaction::parse("5", None, None).unwrap();
        let e = manager.add(Some(&alice()), new).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Timeout);
        assert_eq!(store.value_at(&StorePath::root()), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_add_acknowledged_late_leaves_one_record() {
        let store = LocalStore::new();
        let manager = TransactionManager::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(today())),
            RetryPolicy::new(Duration::from_millis(20), 3).with_base_delay(Duration::ZERO),
        );
        // every attempt reaches the store, none is acknowledged in time
        store.commit_then_hang_next_mutations(4);
        let new = NewTransaction::parse("5", Some("Dining"), None).unwrap();
        let e = manager.add(Some(&alice()), new).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Timeout);

        let stored = store.value_at(&StorePath::transactions("alice").unwrap());
        assert_eq!(stored.as_object().unwrap().len(), 1);
        assert_eq!(store.committed_mutations(), 1);
    }

    #[tokio::test]
    async fn test_add_retried_after_late_ack_returns_the_written_id() {
        let store = LocalStore::new();
        let manager = TransactionManager::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(today())),
            RetryPolicy::new(Duration::from_millis(20), 2).with_base_delay(Duration::ZERO),
        );
        store.commit_then_hang_next_mutations(1);
        let new = NewTransaction::parse("8", None, Some("taxi")).unwrap();
        let id = manager.add(Some(&alice()), new).await.unwrap();

        let stored = store.value_at(&StorePath::transactions("alice").unwrap());
        let ids: Vec<&String> = stored.as_object().unwrap().keys().collect();
        assert_eq!(ids, vec![&id]);
        assert_eq!(stored[id.as_str()]["memo"], json!("taxi"));
    }

    #[tokio::test]
    async fn test_add_retries_transient_failure() {
        let store = LocalStore::new();
        let manager = TransactionManager::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(today())),
            RetryPolicy::new(Duration::from_millis(200), 2).with_base_delay(Duration::ZERO),
        );
        store.fail_next_mutations(2);
        let new = NewTransaction::parse("7.25", None, Some("bus")).unwrap();
        let id = manager.add(Some(&alice()), new).await.unwrap();
        assert_eq!(
            store.value_at(&StorePath::record("alice", &id).unwrap())["memo"],
            json!("bus")
        );
    }

    #[tokio::test]
    async fn test_switching_users_replaces_subscription() {
        let store = seeded();
        let manager = manager(&store);
        manager.subscribe("alice").await.unwrap();
        wait_for_ids(&manager, &["a", "b", "c"]).await;

        manager.subscribe("bob").await.unwrap();
        assert_eq!(manager.state().user_id(), Some("bob"));
        wait_for_ids(&manager, &["x"]).await;
        wait_for_subscribers(&store, 1).await;

        // changes for the old user are not applied
        store
            .append(&StorePath::transactions("alice").unwrap(), json!({"amount": "1"}))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(manager.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_empties_and_unsubscribes() {
        let store = seeded();
        let manager = manager(&store);
        manager.subscribe("alice").await.unwrap();
        wait_for_ids(&manager, &["a", "b", "c"]).await;

        manager.reset();
        assert!(manager.snapshot().is_empty());
        assert!(manager.active_user().is_none());
        assert!(manager.state().user_id().is_none());
        wait_for_subscribers(&store, 0).await;
    }

    #[tokio::test]
    async fn test_failed_subscribe_keeps_collection() {
        let store = seeded();
        let manager = manager(&store);
        manager.subscribe("alice").await.unwrap();
        wait_for_ids(&manager, &["a", "b", "c"]).await;

        store.fail_subscriptions(true);
        let e = manager.subscribe("alice").await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Store);
        assert_eq!(manager.snapshot().len(), 3);
    }
}
