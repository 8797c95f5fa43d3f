//! piggy-promise: a personal expense tracker.
//!
//! Expenses are stored per user in a remote store and followed live. The library keeps the
//! signed-in user's collection of transactions, a weekly budget, and derives weekly, monthly and
//! per-category totals from them. The `piggy` binary drives it from the command line.

pub mod api;
pub mod app;
pub mod args;
pub mod budget;
pub mod clock;
pub mod commands;
mod config;
mod error;
pub mod model;
pub mod report;
pub mod session;
pub mod transactions;
mod utils;


pub use api::{Identity, Mode};
pub use app::App;
pub use config::Config;
pub use error::{Error, ErrorType, Result};
