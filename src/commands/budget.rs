//! Budget command handlers. The weekly budget is a setting of this device, kept in `config.json`.

use crate::budget::BudgetManager;
use crate::commands::Out;
use crate::model::format_money;
use crate::{Config, Result};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct BudgetView {
    pub weekly: Decimal,
    pub monthly: Decimal,
}

impl BudgetView {
    fn new(budget: &BudgetManager) -> Self {
        Self {
            weekly: budget.get(),
            monthly: budget.monthly(),
        }
    }

    fn message(&self, verb: &str) -> String {
        format!(
            "Weekly budget {verb} {} (monthly budget is {})",
            format_money(self.weekly),
            format_money(self.monthly)
        )
    }
}

/// Handles `piggy budget`.
pub async fn budget(config: &Config) -> Result<Out<BudgetView>> {
    let view = BudgetView::new(&BudgetManager::new(config.weekly_budget()));
    Ok(Out::new(view.message("is"), view))
}

/// Handles `piggy budget set VALUE`.
///
/// # Errors
/// `ErrorType::Validation` if `value` is not a number greater than 0, in which case nothing is
/// saved.
pub async fn budget_set(config: &mut Config, value: &str) -> Result<Out<BudgetView>> {
    let budget = BudgetManager::new(config.weekly_budget());
    let weekly = budget.set_str(value)?;
    config.set_weekly_budget(weekly).await?;
    let view = BudgetView::new(&budget);
    Ok(Out::new(view.message("set to"), view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_default_budget() {
        let env = TestEnv::new().await;
        let out = budget(env.config()).await.unwrap();
        assert_eq!(
            out.message(),
            "Weekly budget is $500.00 (monthly budget is $2,000.00)"
        );
    }

    #[tokio::test]
    async fn test_set_budget_is_saved() {
        let mut env = TestEnv::new().await;
        let out = budget_set(env.config_mut(), "250").await.unwrap();
        assert_eq!(
            out.message(),
            "Weekly budget set to $250.00 (monthly budget is $1,000.00)"
        );
        let reloaded = Config::load(env.config().root()).await.unwrap();
        assert_eq!(reloaded.weekly_budget(), Decimal::from(250));
    }

    #[tokio::test]
    async fn test_invalid_budget_is_not_saved() {
        let mut env = TestEnv::new().await;
        for bad in ["0", "-1", "lots", "79228162514264337593543950335"] {
            let e = budget_set(env.config_mut(), bad).await.unwrap_err();
            assert_eq!(e.error_type(), ErrorType::Validation);
            assert_eq!(e.to_string(), "Please enter a valid number greater than 0");
        }
        let reloaded = Config::load(env.config().root()).await.unwrap();
        assert_eq!(reloaded.weekly_budget(), Decimal::from(500));
    }

    #[tokio::test]
    async fn test_overflowing_budget_is_not_saved() {
        let mut env = TestEnv::new().await;
        let e = env
            .config_mut()
            .set_weekly_budget(Decimal::MAX)
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Validation);
        assert_eq!(env.config().weekly_budget(), Decimal::from(500));
        let out = budget(env.config()).await.unwrap();
        assert_eq!(out.structure().unwrap().monthly, Decimal::from(2000));
    }
}
