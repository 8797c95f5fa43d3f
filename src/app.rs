//! The application context. `App` owns the session gate, the transaction state manager and the
//! budget, and keeps them in step: when someone signs in their transactions are followed, and when
//! they sign out the collection is discarded.

use crate::api::{self, Backends, Identity, IdentityProvider, Mode, RetryPolicy};
use crate::budget::BudgetManager;
use crate::clock::{Clock, SystemClock};
use crate::error::ErrorType;
use crate::model::{NewTransaction, Transactions};
use crate::report::Report;
use crate::session::{SessionGate, SessionState};
use crate::transactions::TransactionManager;
use crate::{Config, Error, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct App {
    identity: Arc<dyn IdentityProvider>,
    session: SessionGate,
    transactions: Arc<TransactionManager>,
    budget: BudgetManager,
    clock: Arc<dyn Clock>,
    wiring: JoinHandle<()>,
}

impl App {
    /// Connects to the backends chosen by `mode` and starts the app with the settings in `config`.
    pub async fn open(config: &Config, mode: Mode) -> Result<Self> {
        let backends = api::backends(config, mode).await?;
        Ok(Self::start(
            backends,
            Arc::new(SystemClock),
            config.retry_policy(),
            config.weekly_budget(),
        )
        .await)
    }

    pub async fn start(
        backends: Backends,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        weekly_budget: Decimal,
    ) -> Self {
        let Backends { store, identity } = backends;
        let session = SessionGate::start(identity.as_ref()).await;
        let transactions = Arc::new(TransactionManager::new(store, clock.clone(), retry));
        let wiring = tokio::spawn(follow_session(session.watch(), transactions.clone()));
        Self {
            identity,
            session,
            transactions,
            budget: BudgetManager::new(weekly_budget),
            clock,
            wiring,
        }
    }

    pub fn session(&self) -> &SessionGate {
        &self.session
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn budget(&self) -> &BudgetManager {
        &self.budget
    }

    /// The signed-in identity as last reported by the identity provider.
    pub fn identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        self.identity.sign_in(email, password).await
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<Identity> {
        self.identity.register(email, password).await
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.identity.sign_out().await?;
        self.transactions.reset();
        Ok(())
    }

    pub async fn add_transaction(&self, transaction: NewTransaction) -> Result<String> {
        let identity = self.identity();
        self.transactions.add(identity.as_ref(), transaction).await
    }

    pub async fn delete_transaction(&self, id: &str) -> Result<()> {
        let identity = self.identity();
        self.transactions.delete(identity.as_ref(), id).await
    }

    /// Waits until the session has loaded and, if someone is signed in, until their first
    /// snapshot of transactions has arrived. Each wait is bounded by `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<SessionState> {
        let state = self.session.wait_until_loaded(timeout).await?;
        if let Some(identity) = state.identity() {
            let uid = identity.uid().to_string();
            let mut receiver = self.transactions.watch();
            let wait = receiver.wait_for(|s| s.is_synced() && s.user_id() == Some(uid.as_str()));
            let outcome = match tokio::time::timeout(timeout, wait).await {
                Ok(Ok(_)) => Ok(()),
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
            outcome?;
        }
        Ok(state)
    }

    pub fn snapshot(&self) -> Transactions {
        self.transactions.snapshot()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Totals for today against the current budget.
    pub fn report(&self) -> Report {
        self.report_for(self.today())
    }

    pub fn report_for(&self, today: NaiveDate) -> Report {
        Report::build(self.snapshot().as_slice(), self.budget.get(), today)
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.wiring.abort();
    }
}

/// Subscribes to the transactions of whoever signs in and resets the collection on sign-out.
async fn follow_session(
    mut session: watch::Receiver<SessionState>,
    transactions: Arc<TransactionManager>,
) {
    let mut followed: Option<String> = None;
    loop {
        let state = session.borrow_and_update().clone();
        match state.identity() {
            Some(identity) if followed.as_deref() != Some(identity.uid()) => {
                followed = Some(identity.uid().to_string());
                if let Err(e) = transactions.subscribe(identity.uid()).await {
                    warn!("Transactions for {} are not being followed: {e}", identity);
                }
            }
            Some(_) => {}
            None if state.is_signed_out() && followed.is_some() => {
                followed = None;
                transactions.reset();
            }
            None => {}
        }
        if session.changed().await.is_err() {
            break;
        }
    }
    debug!("Stopped following the session");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{LocalIdentity, LocalStore};
    use crate::clock::FixedClock;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 16).unwrap()
    }

    async fn app(store: &LocalStore, identity: Arc<LocalIdentity>) -> App {
        let backends = Backends {
            store: Arc::new(store.clone()),
            identity,
        };
        App::start(
            backends,
            Arc::new(FixedClock::new(today())),
            RetryPolicy::new(Duration::from_millis(200), 0),
            Decimal::from(500),
        )
        .await
    }

    async fn wait_for_count(app: &App, count: usize) {
        let mut watch = app.transactions().watch();
        tokio::time::timeout(
            WAIT,
            watch.wait_for(|s| s.is_synced() && s.transactions().len() == count),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_signed_out_app_is_ready_and_empty() {
        let store = LocalStore::new();
        let app = app(&store, Arc::new(LocalIdentity::new())).await;
        let state = app.wait_until_ready(WAIT).await.unwrap();
        assert!(state.is_signed_out());
        assert!(app.snapshot().is_empty());
        let e = app
            .add_transaction(NewTransaction::parse("5", None, None).unwrap())
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_add_report_sign_out() {
        let store = LocalStore::new();
        let identity = Arc::new(LocalIdentity::new());
        let app = app(&store, identity.clone()).await;
        app.wait_until_ready(WAIT).await.unwrap();

        let me = app.register("me@example.com", "secret1").await.unwrap();
        let mut session = app.session().watch();
        session
            .wait_for(|s| s.identity() == Some(&me))
            .await
            .unwrap();
        app.wait_until_ready(WAIT).await.unwrap();

        app.add_transaction(NewTransaction::parse("300", Some("Grocery"), None).unwrap())
            .await
            .unwrap();
        app.add_transaction(NewTransaction::parse("250", None, Some("dinner")).unwrap())
            .await
            .unwrap();
        wait_for_count(&app, 2).await;

        let report = app.report();
        assert_eq!(report.weekly_total, Decimal::from(550));
        assert_eq!(
            report.weekly_status().to_string(),
            "You have exceeded your weekly budget by $50.00"
        );
        assert_eq!(report.category_sums["?"], Decimal::from(250));

        app.sign_out().await.unwrap();
        assert!(app.snapshot().is_empty());
        assert_eq!(app.transactions().active_user(), None);
        let stored = store.value_at(&api::StorePath::transactions(me.uid()).unwrap());
        assert_eq!(stored.as_object().map(|o| o.len()), Some(2));
    }

    #[tokio::test]
    async fn test_users_see_only_their_own_transactions() {
        let store = LocalStore::with_data(json!({
            "transactions": {
                "someone-else": {"x": {"amount": "99", "date": "2024-10-16"}}
            }
        }));
        let identity = Arc::new(LocalIdentity::new());
        let app = app(&store, identity).await;
        app.register("new@example.com", "secret1").await.unwrap();
        let mut session = app.session().watch();
        session.wait_for(|s| s.identity().is_some()).await.unwrap();
        app.wait_until_ready(WAIT).await.unwrap();
        assert!(app.snapshot().is_empty());
        assert_eq!(app.report().total_spent, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_delete_goes_through_app() {
        let store = LocalStore::new();
        let app = app(&store, Arc::new(LocalIdentity::new())).await;
        app.register("d@example.com", "secret1").await.unwrap();
        let mut session = app.session().watch();
        session.wait_for(|s| s.identity().is_some()).await.unwrap();
        app.wait_until_ready(WAIT).await.unwrap();

        let id = app
            .add_transaction(NewTransaction::parse("1", None, None).unwrap())
            .await
            .unwrap();
        wait_for_count(&app, 1).await;
        app.delete_transaction(&id).await.unwrap();
        wait_for_count(&app, 0).await;
    }
}
