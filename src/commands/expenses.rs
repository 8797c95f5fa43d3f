//! Command handlers that read and change the signed-in user's expenses.

use crate::api::Mode;
use crate::app::App;
use crate::commands::{plural, ready_timeout, Out};
use crate::error::ErrorType;
use crate::model::{category_label, format_money, NewTransaction, Transaction};
use crate::{Config, Error, Result};
use tracing::{debug, info};

/// Handles the `piggy add` command. The expense is dated today and its newly generated id is
/// returned.
///
/// # Errors
/// - `ErrorType::Validation` if the amount is not a number or is negative.
/// - `ErrorType::Unauthenticated` if nobody is signed in.
/// - `ErrorType::Store` or `ErrorType::Timeout` if the remote store fails.
pub async fn add(
    config: &Config,
    mode: Mode,
    amount: &str,
    category: Option<&str>,
    memo: Option<&str>,
) -> Result<Out<String>> {
    let transaction = NewTransaction::parse(amount, category, memo)?;
    let spent = format_money(transaction.amount().value());
    let app = App::open(config, mode).await?;
    app.session().wait_until_loaded(ready_timeout(config)).await?;
    let id = app.add_transaction(transaction).await?;
    Ok(Out::new(format!("Added {spent} as {id}"), id))
}

/// Handles the `piggy delete` command. Only the one expense is removed.
pub async fn delete(config: &Config, mode: Mode, id: &str) -> Result<Out<()>> {
    let app = App::open(config, mode).await?;
    app.session().wait_until_loaded(ready_timeout(config)).await?;
    app.delete_transaction(id).await?;
    Ok(format!("Deleted transaction {id}").into())
}

/// Handles the `piggy list` command: the signed-in user's expenses, most recent first.
pub async fn list(
    config: &Config,
    mode: Mode,
    limit: Option<usize>,
) -> Result<Out<Vec<Transaction>>> {
    let app = App::open(config, mode).await?;
    require_identity(&app, config).await?;
    let mut recent = app.snapshot().recent();
    let total = recent.len();
    if let Some(limit) = limit {
        recent.truncate(limit);
    }
    let message = if recent.len() == total {
        plural(total, "transaction")
    } else {
        format!("Showing {} of {}", recent.len(), plural(total, "transaction"))
    };
    let display = render(&recent);
    Ok(Out::new(message, recent).with_display(display))
}

/// Handles the `piggy watch` command: prints the expense list whenever it changes, until Ctrl-C.
pub async fn watch(config: &Config, mode: Mode) -> Result<Out<()>> {
    let app = App::open(config, mode).await?;
    require_identity(&app, config).await?;
    let mut changes = app.transactions().watch();
    let mut shown = 0usize;
    loop {
        let state = changes.borrow_and_update().clone();
        if state.is_synced() {
            let recent = state.transactions().recent();
            info!("{}", plural(recent.len(), "transaction"));
            println!("{}", render(&recent));
            shown += 1;
        }
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("The transaction state went away");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(format!("Stopped watching after {}", plural(shown, "update")).into())
}

/// Waits for the session and the first snapshot, failing if nobody is signed in.
async fn require_identity(app: &App, config: &Config) -> Result<()> {
    let state = app.wait_until_ready(ready_timeout(config)).await?;
    if state.identity().is_none() {
        return Err(Error::msg(
            ErrorType::Unauthenticated,
            "Nobody is logged in, run 'piggy login' or 'piggy register'",
        ));
    }
    Ok(())
}

fn render(transactions: &[Transaction]) -> String {
    transactions
        .iter()
        .map(|t| {
            let date = t
                .date()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string());
            let amount = match t.amount().value() {
                Some(value) => format_money(value),
                None => t.amount().to_string(),
            };
            let mut line = format!(
                "{}  {date:<10}  {amount:>12}  {}",
                t.id(),
                category_label(t.category())
            );
            if let Some(memo) = t.memo() {
                line.push_str("  ");
                line.push_str(memo);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::register;
    use crate::test::TestEnv;

    async fn signed_in() -> TestEnv {
        let env = TestEnv::new().await;
        register(env.config(), Mode::Local, "me@example.com", "secret1")
            .await
            .unwrap();
        env
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let env = signed_in().await;
        let config = env.config();
        let out = add(config, Mode::Local, "12.5", Some("Dining"), Some("lunch"))
            .await
            .unwrap();
        let id = out.structure().unwrap().clone();
        assert_eq!(out.message(), format!("Added $12.50 as {id}"));
        add(config, Mode::Local, "3", None, None).await.unwrap();

        let out = list(config, Mode::Local, None).await.unwrap();
        assert_eq!(out.message(), "2 transactions");
        let listed = out.structure().unwrap();
        assert_eq!(listed.len(), 2);
        let lunch = listed.iter().find(|t| t.id() == id).unwrap();
        assert_eq!(lunch.category(), Some("Dining"));
        assert_eq!(lunch.memo(), Some("lunch"));
        assert!(lunch.date().is_some());
        assert!(out.display().unwrap().contains("$12.50"));

        let out = list(config, Mode::Local, Some(1)).await.unwrap();
        assert_eq!(out.message(), "Showing 1 of 2 transactions");
    }

    #[tokio::test]
    async fn test_delete_removes_one() {
        let env = signed_in().await;
        let config = env.config();
        let keep = add(config, Mode::Local, "1", None, None).await.unwrap();
        let gone = add(config, Mode::Local, "2", None, None).await.unwrap();
        delete(config, Mode::Local, gone.structure().unwrap())
            .await
            .unwrap();

        let out = list(config, Mode::Local, None).await.unwrap();
        let ids: Vec<&str> = out.structure().unwrap().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![keep.structure().unwrap().as_str()]);
    }

    #[tokio::test]
    async fn test_invalid_amount_is_rejected() {
        let env = signed_in().await;
        for bad in ["abc", "-5", ""] {
            let e = add(env.config(), Mode::Local, bad, None, None)
                .await
                .unwrap_err();
            assert_eq!(e.error_type(), ErrorType::Validation, "amount '{bad}'");
        }
    }

    #[tokio::test]
    async fn test_signed_out_commands_fail() {
        let env = TestEnv::new().await;
        let e = add(env.config(), Mode::Local, "5", None, None)
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Unauthenticated);
        assert_eq!(e.to_string(), "User is not logged in.");

        let e = delete(env.config(), Mode::Local, "abc").await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Unauthenticated);

        let e = list(env.config(), Mode::Local, None).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Unauthenticated);
    }
}
