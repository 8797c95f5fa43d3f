//! Report command handlers.

use crate::api::Mode;
use crate::app::App;
use crate::commands::{ready_timeout, Out};
use crate::model::{format_money, SuggestedCategory};
use crate::report::Report;
use crate::{Config, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Handles `piggy report`: this week's and this month's spending against the budget, and all
/// spending against the weekly budget.
pub async fn report(config: &Config, mode: Mode) -> Result<Out<Report>> {
    let app = App::open(config, mode).await?;
    app.wait_until_ready(ready_timeout(config)).await?;
    let report = app.report();
    let message = report.weekly_status().to_string();
    let display = render(&report);
    Ok(Out::new(message, report).with_display(display))
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CategoryView {
    pub sums: BTreeMap<String, Decimal>,
    pub suggestions: Vec<SuggestedCategory>,
}

/// Handles `piggy categories`: all spending per category, as in the pie chart.
pub async fn categories(config: &Config, mode: Mode) -> Result<Out<CategoryView>> {
    let app = App::open(config, mode).await?;
    app.wait_until_ready(ready_timeout(config)).await?;
    let sums = crate::report::category_sums(app.snapshot().as_slice());
    let mut display = String::new();
    for (label, total) in &sums {
        let _ = writeln!(display, "{label:<16} {:>12}", format_money(*total));
    }
    let suggestions = SuggestedCategory::ALL.to_vec();
    let names: Vec<String> = suggestions.iter().map(|c| c.to_string()).collect();
    let _ = write!(display, "Suggested categories: {}", names.join(", "));
    let message = match sums.len() {
        1 => "Spending in 1 category".to_string(),
        n => format!("Spending in {n} categories"),
    };
    Ok(Out::new(message, CategoryView { sums, suggestions }).with_display(display))
}

fn render(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Week of {} to {}",
        report.week_start, report.week_end
    );
    let _ = writeln!(
        out,
        "  Total spent this week: {}",
        format_money(report.weekly_total)
    );
    let _ = writeln!(
        out,
        "  Weekly budget: {}",
        format_money(report.weekly_budget)
    );
    let _ = writeln!(out, "  {}", report.weekly_status());
    let _ = writeln!(
        out,
        "Month of {} to {}",
        report.month_start, report.month_end
    );
    let _ = writeln!(
        out,
        "  Total spent this month: {}",
        format_money(report.monthly_total)
    );
    let _ = writeln!(
        out,
        "  Monthly budget: {} (Monthly budget is calculated as 4x the weekly budget)",
        format_money(report.monthly_budget)
    );
    let _ = writeln!(out, "  {}", report.monthly_status());
    let _ = writeln!(out, "Total spent: {}", format_money(report.total_spent));
    let _ = write!(out, "  {}", report.overall_status());
    out
}
