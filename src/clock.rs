//! The source of "today" for dating new transactions and choosing report windows.

use chrono::{Local, NaiveDate};
use std::fmt::Debug;

pub trait Clock: Debug + Send + Sync {
    /// The current calendar date.
    fn today(&self) -> NaiveDate;
}

/// Reads the local date from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Always returns the same date.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FixedClock(NaiveDate);

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
