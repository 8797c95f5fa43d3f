//! The aggregation engine: pure functions that derive totals from a collection of transactions and
//! a budget. All money results are rounded to two decimal places, midpoint away from zero.
//!
//! Transactions whose amount is not a number count as zero. Transactions without a readable date
//! count toward `total_spent` and `category_sums` but fall outside every week and month.

use crate::model::{category_label, format_money, round_money, Transaction};
use chrono::{Datelike, Days, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use tracing::warn;

/// Weeks per month, as used for the monthly budget.
const WEEKS_PER_MONTH: Decimal = Decimal::from_parts(4, 0, 0, false, 0);

/// The sum of all amounts.
pub fn total_spent(transactions: &[Transaction]) -> Decimal {
    sum(transactions.iter())
}

/// The first and last day (inclusive) of the week containing `reference`. Weeks start on Sunday.
pub fn week_bounds(reference: NaiveDate) -> (NaiveDate, NaiveDate) {
    let into_week = u64::from(reference.weekday().num_days_from_sunday());
    // subtracting at most six days from a valid date cannot leave chrono's range in practice
    let start = reference.checked_sub_days(Days::new(into_week)).unwrap_or(reference);
    let end = start.checked_add_days(Days::new(6)).unwrap_or(start);
    (start, end)
}

/// The sum of amounts dated within the week containing `reference`.
pub fn weekly_total(transactions: &[Transaction], reference: NaiveDate) -> Decimal {
    let (start, end) = week_bounds(reference);
    sum_between(transactions, start, end)
}

/// The first and last day (inclusive) of the month containing `reference`.
pub fn month_bounds(reference: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = reference.with_day(1).unwrap_or(reference);
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.checked_sub_days(Days::new(1)))
        .unwrap_or(reference);
    (start, end)
}

/// The sum of amounts dated within the month containing `reference`.
pub fn monthly_total(transactions: &[Transaction], reference: NaiveDate) -> Decimal {
    let (start, end) = month_bounds(reference);
    sum_between(transactions, start, end)
}

/// The sum of amounts per category. Transactions with no category are counted under `"?"`, and
/// transactions whose amount is not a number are left out.
pub fn category_sums(transactions: &[Transaction]) -> BTreeMap<String, Decimal> {
    let mut sums: BTreeMap<String, Decimal> = BTreeMap::new();
    for transaction in transactions {
        let Some(amount) = transaction.amount().value() else {
            continue;
        };
        let label = category_label(transaction.category()).to_string();
        let entry = sums.entry(label).or_default();
        match entry.checked_add(amount) {
            Some(total) => *entry = total,
            None => warn!("Skipping transaction {} to avoid overflow", transaction.id()),
        }
    }
    sums.into_iter()
        .map(|(label, total)| (label, round_money(total)))
        .collect()
}

/// By how much `total` goes over `budget`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct Exceedance {
    /// `max(0, total - budget)`
    pub amount: Decimal,
    /// `total > budget`
    pub is_exceeded: bool,
}

/// How far `total` goes over `budget`, rounded to cents. Zero when within budget.
pub fn exceedance(total: Decimal, budget: Decimal) -> Exceedance {
    let is_exceeded = total > budget;
    let amount = if is_exceeded {
        round_money(total - budget)
    } else {
        Decimal::ZERO
    };
    Exceedance {
        amount,
        is_exceeded,
    }
}

/// Four times `weekly_budget`. This is a deliberate approximation, not calendar-accurate.
/// Saturates at `Decimal::MAX`; see `checked_monthly_budget`.
pub fn monthly_budget(weekly_budget: Decimal) -> Decimal {
    checked_monthly_budget(weekly_budget).unwrap_or(Decimal::MAX)
}

/// Four times `weekly_budget`, or `None` if that does not fit in a `Decimal`.
pub fn checked_monthly_budget(weekly_budget: Decimal) -> Option<Decimal> {
    weekly_budget.checked_mul(WEEKS_PER_MONTH)
}

fn sum<'a>(transactions: impl Iterator<Item = &'a Transaction>) -> Decimal {
    let mut total = Decimal::ZERO;
    for transaction in transactions {
        match total.checked_add(transaction.amount().value_or_zero()) {
            Some(next) => total = next,
            None => warn!("Skipping transaction {} to avoid overflow", transaction.id()),
        }
    }
    round_money(total)
}

fn sum_between(transactions: &[Transaction], start: NaiveDate, end: NaiveDate) -> Decimal {
    sum(transactions.iter().filter(|t| match t.date() {
        Some(date) => start <= date && date <= end,
        None => false,
    }))
}

/// Which budget a `BudgetStatus` talks about.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    /// Everything spent, against the weekly budget, as on the home screen.
    Overall,
    Weekly,
    Monthly,
}

/// The one-line verdict shown under a total.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct BudgetStatus {
    scope: BudgetScope,
    exceedance: Exceedance,
}

impl BudgetStatus {
    pub fn new(scope: BudgetScope, exceedance: Exceedance) -> Self {
        Self { scope, exceedance }
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceedance.is_exceeded
    }
}

impl Display for BudgetStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let budget = match self.scope {
            BudgetScope::Overall => "budget",
            BudgetScope::Weekly => "weekly budget",
            BudgetScope::Monthly => "monthly budget",
        };
        if self.exceedance.is_exceeded {
            write!(
                f,
                "You have exceeded your {budget} by {}",
                format_money(self.exceedance.amount)
            )
        } else {
            write!(f, "You are within your {budget}.")
        }
    }
}

/// Every derived figure for one day, as shown on the home and report screens.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Report {
    pub date: NaiveDate,
    pub weekly_budget: Decimal,
    pub monthly_budget: Decimal,
    pub total_spent: Decimal,
    pub total_exceedance: Exceedance,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub weekly_total: Decimal,
    pub weekly_exceedance: Exceedance,
    pub month_start: NaiveDate,
    pub month_end: NaiveDate,
    pub monthly_total: Decimal,
    pub monthly_exceedance: Exceedance,
    pub category_sums: BTreeMap<String, Decimal>,
}

impl Report {
    pub fn build(transactions: &[Transaction], weekly_budget: Decimal, today: NaiveDate) -> Self {
        let monthly_budget = monthly_budget(weekly_budget);
        let total_spent = total_spent(transactions);
        let (week_start, week_end) = week_bounds(today);
        let weekly_total = weekly_total(transactions, today);
        let (month_start, month_end) = month_bounds(today);
        let monthly_total = monthly_total(transactions, today);
        Self {
            date: today,
            weekly_budget,
            monthly_budget,
            total_spent,
            total_exceedance: exceedance(total_spent, weekly_budget),
            week_start,
            week_end,
            weekly_total,
            weekly_exceedance: exceedance(weekly_total, weekly_budget),
            month_start,
            month_end,
            monthly_total,
            monthly_exceedance: exceedance(monthly_total, monthly_budget),
            category_sums: category_sums(transactions),
        }
    }

    /// All-time spending against the weekly budget.
    pub fn overall_status(&self) -> BudgetStatus {
        BudgetStatus::new(BudgetScope::Overall, self.total_exceedance)
    }

    pub fn weekly_status(&self) -> BudgetStatus {
        BudgetStatus::new(BudgetScope::Weekly, self.weekly_exceedance)
    }

    pub fn monthly_status(&self) -> BudgetStatus {
        BudgetStatus::new(BudgetScope::Monthly, self.monthly_exceedance)
    }
}
