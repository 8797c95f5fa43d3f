//! Command handlers for the piggy CLI.
//!
//! This module contains implementations for all CLI subcommands.

mod auth;
mod budget;
mod expenses;
mod init;
mod report;

use crate::Config;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info};

pub use auth::{login, logout, register, whoami};
pub use budget::{budget, budget_set, BudgetView};
pub use expenses::{add, delete, list, watch};
pub use init::init;
pub use report::{categories, report, CategoryView};

/// The output type for a command. This allows the command to return a consistent message and,
/// optionally, structured data and a human-readable rendering of it.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// A message that can be printed to the user regarding the outcome of the command execution.
    message: String,

    /// Any structured data that needs to be output from the call.
    structure: Option<T>,

    /// Text for stdout, e.g. a table of transactions.
    #[serde(skip)]
    display: Option<String>,
}

impl<T, S> From<S> for Out<T>
where
    T: Debug + Clone + Serialize,
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Out::new_message(value)
    }
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a new `Out` object that has `Some(structure)`.
    pub fn new<S>(message: S, structure: T) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: Some(structure),
            display: None,
        }
    }

    /// Create a new `Out` object that has `None` for `structure`.
    pub fn new_message<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: None,
            display: None,
        }
    }

    /// Adds text that `print` writes to stdout.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Get the `message`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the structured data stored in `structure`.
    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    /// Print the message to `info!`, the structured data (if it exists) as JSON to `debug!`, and
    /// the display text (if it exists) to stdout.
    pub fn print(&self) {
        info!("{}", self.message);
        if let Some(structure) = self.structure() {
            if let Ok(json) = serde_json::to_string_pretty(structure) {
                debug!("Command output:\n\n{json}\n\n");
            }
        }
        if let Some(display) = self.display() {
            println!("{display}");
        }
    }
}

/// How long a command waits for the session and the first snapshot: one full run of the retry
/// policy.
fn ready_timeout(config: &Config) -> Duration {
    config.request_timeout() * (config.max_retries() + 1)
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}
