//! The budget state manager: holds the weekly spending budget.

use crate::error::ErrorType;
use crate::model::round_money;
use crate::report::{checked_monthly_budget, monthly_budget};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::sync::watch;
use tracing::{info, warn};

/// The weekly budget before the user sets one.
pub const DEFAULT_WEEKLY_BUDGET: Decimal = Decimal::from_parts(500, 0, 0, false, 0);

const INVALID_BUDGET: &str = "Please enter a valid number greater than 0";

/// Whether `weekly` can serve as the weekly budget: greater than zero, and small enough that the
/// monthly budget can be computed.
pub fn is_valid_weekly_budget(weekly: Decimal) -> bool {
    weekly > Decimal::ZERO && checked_monthly_budget(weekly).is_some()
}

/// Holds the weekly budget. The value is always valid per `is_valid_weekly_budget`.
#[derive(Debug)]
pub struct BudgetManager {
    weekly: watch::Sender<Decimal>,
}

impl Default for BudgetManager {
    fn default() -> Self {
        Self::new(DEFAULT_WEEKLY_BUDGET)
    }
}

impl BudgetManager {
    /// Starts with `weekly`, falling back to the default if it is not a valid budget.
    pub fn new(weekly: Decimal) -> Self {
        let weekly = if is_valid_weekly_budget(weekly) {
            weekly
        } else {
            warn!("Ignoring a weekly budget of {weekly}, using {DEFAULT_WEEKLY_BUDGET}");
            DEFAULT_WEEKLY_BUDGET
        };
        let (sender, _) = watch::channel(weekly);
        Self { weekly: sender }
    }

    pub fn get(&self) -> Decimal {
        *self.weekly.borrow()
    }

    /// Sets the weekly budget. A value that is not greater than zero, or so large that the monthly
    /// budget overflows, is rejected with `ErrorType::Validation` and the budget is unchanged.
    pub fn set(&self, weekly: Decimal) -> Result<Decimal> {
        if weekly <= Decimal::ZERO {
            return Err(Error::msg(ErrorType::Validation, INVALID_BUDGET));
        }
        let weekly = round_money(weekly);
        if !is_valid_weekly_budget(weekly) {
            return Err(Error::msg(ErrorType::Validation, INVALID_BUDGET));
        }
        self.weekly.send_replace(weekly);
        info!("Weekly budget set to {weekly}");
        Ok(weekly)
    }

    /// Parses and sets the weekly budget, e.g. from a text field.
    pub fn set_str(&self, weekly: &str) -> Result<Decimal> {
        let parsed = Decimal::from_str(weekly.trim())
            .map_err(|_| Error::msg(ErrorType::Validation, INVALID_BUDGET))?;
        self.set(parsed)
    }

    /// The monthly budget: four times the weekly budget.
    pub fn monthly(&self) -> Decimal {
        monthly_budget(self.get())
    }

    /// A receiver that is notified whenever the budget changes.
    pub fn watch(&self) -> watch::Receiver<Decimal> {
        self.weekly.subscribe()
    }
}
