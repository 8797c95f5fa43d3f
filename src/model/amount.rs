//! Monetary values.
//!
//! `Amount` wraps `Decimal` and parses what people type into an amount field: with or without a
//! dollar sign, with or without thousands separators. `StoredAmount` is what the remote store
//! hands back for a transaction's `amount`, which may be text, a JSON number, garbage, or missing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Represents a dollar amount.
///
/// # Examples
///
/// ```
/// # use piggy_promise::model::Amount;
/// # use std::str::FromStr;
/// let a = Amount::from_str("$1,250.5").unwrap();
/// assert_eq!(a.to_string(), "$1,250.50");
/// assert_eq!(a.to_plain_string(), "1250.5");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    pub const fn new(value: Decimal) -> Self {
        Self { value }
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.value.is_sign_negative()
    }

    /// The value without a dollar sign or separators, as it is written to the remote store.
    pub fn to_plain_string(&self) -> String {
        self.value.to_string()
    }
}

/// Rounds to cents, with halves rounded away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Formats a value the way amounts are shown to the user, e.g. `$1,234.50` or `-$3.00`.
pub fn format_money(value: Decimal) -> String {
    let rounded = round_money(value);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let abs = rounded.abs().to_f64().unwrap_or_default();
    format!("{sign}${}", format_num::format_num!(",.2", abs))
}

/// An error that can occur when parsing strings into `Amount` values.
pub struct AmountError(rust_decimal::Error);

impl Debug for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Error for AmountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        // "-$50.00", "$50.00", "-50.00" and "50.00" are all accepted
        let without_dollar = if let Some(after_minus) = trimmed.strip_prefix('-') {
            match after_minus.strip_prefix('$') {
                Some(after_dollar) => format!("-{after_dollar}"),
                None => trimmed.to_string(),
            }
        } else if let Some(after_dollar) = trimmed.strip_prefix('$') {
            after_dollar.to_string()
        } else {
            trimmed.to_string()
        };

        let without_commas = without_dollar.replace(',', "");
        let value = Decimal::from_str(&without_commas)
            .or_else(|_| Decimal::from_scientific(&without_commas))
            .map_err(AmountError)?;
        Ok(Amount { value })
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&format_money(self.value))
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_plain_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

/// The `amount` field of a transaction as it was found in the remote store.
///
/// Records written by this crate always carry a parseable amount, but the store is shared with
/// other clients and nothing stops them from writing `"abc"` or leaving the field out. Those
/// records are kept so they can be listed and deleted; they contribute zero to every total.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoredAmount {
    /// A number, or text that parses as one.
    Parsed(Amount),
    /// Something that is not a number. Holds the original text.
    Unparsed(String),
    /// The field was absent or null.
    #[default]
    Missing,
}

impl StoredAmount {
    /// The numeric value, if there is one.
    pub fn value(&self) -> Option<Decimal> {
        match self {
            StoredAmount::Parsed(amount) => Some(amount.value()),
            _ => None,
        }
    }

    /// The value used when summing: non-numeric and missing amounts count as zero.
    pub fn value_or_zero(&self) -> Decimal {
        self.value().unwrap_or(Decimal::ZERO)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, StoredAmount::Missing)
    }

    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => StoredAmount::Missing,
            serde_json::Value::String(s) if s.trim().is_empty() => StoredAmount::Missing,
            serde_json::Value::String(s) => match Amount::from_str(&s) {
                Ok(amount) => StoredAmount::Parsed(amount),
                Err(_) => StoredAmount::Unparsed(s),
            },
            serde_json::Value::Number(n) => {
                let text = n.to_string();
                match Amount::from_str(&text) {
                    Ok(amount) => StoredAmount::Parsed(amount),
                    Err(_) => StoredAmount::Unparsed(text),
                }
            }
            other => StoredAmount::Unparsed(other.to_string()),
        }
    }
}

impl From<Amount> for StoredAmount {
    fn from(amount: Amount) -> Self {
        StoredAmount::Parsed(amount)
    }
}

impl Display for StoredAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoredAmount::Parsed(amount) => Display::fmt(amount, f),
            StoredAmount::Unparsed(text) => write!(f, "${text}"),
            StoredAmount::Missing => f.write_str("$?"),
        }
    }
}

impl Serialize for StoredAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            StoredAmount::Parsed(amount) => amount.serialize(serializer),
            StoredAmount::Unparsed(text) => serializer.serialize_str(text),
            StoredAmount::Missing => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for StoredAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(StoredAmount::from_json(value))
    }
}
