use crate::error::{Error, ErrorType, Result};
use crate::model::{Amount, StoredAmount};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// The format of the `date` field in the remote store.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One recorded expense.
///
/// Transactions are immutable. They are created through `TransactionManager::add`, which assigns
/// the `date` and takes the `id` from `RemoteStore::new_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Transaction {
    id: String,
    amount: StoredAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDate>,
}

impl Transaction {
    pub fn new(
        id: impl Into<String>,
        amount: impl Into<StoredAmount>,
        category: Option<String>,
        memo: Option<String>,
        date: Option<NaiveDate>,
    ) -> Self {
        Self {
            id: id.into(),
            amount: amount.into(),
            category,
            memo,
            date,
        }
    }

    /// Decodes the record stored under `id`. A `date` that cannot be read is dropped, which keeps
    /// the transaction out of weekly and monthly totals.
    pub(crate) fn from_record(id: impl Into<String>, record: TransactionRecord) -> Self {
        let id = id.into();
        let date = match record.date.as_deref() {
            None => {
                warn!("Transaction {id} has no date");
                None
            }
            Some(raw) => {
                let parsed = parse_date(raw);
                if parsed.is_none() {
                    warn!("Transaction {id} has an unreadable date '{raw}'");
                }
                parsed
            }
        };
        Self {
            id,
            amount: record.amount,
            category: record.category,
            memo: record.memo,
            date,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn amount(&self) -> &StoredAmount {
        &self.amount
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }
}

/// Accepts `2024-10-15` and full ISO timestamps such as `2024-10-15T08:30:00.000Z`.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.trim().split('T').next().unwrap_or_default();
    NaiveDate::parse_from_str(day, DATE_FORMAT).ok()
}

/// The shape of a transaction in the remote store, at `transactions/{uid}/{id}`. The `id` is the
/// key of the node and is not repeated inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct TransactionRecord {
    #[serde(default, skip_serializing_if = "StoredAmount::is_missing")]
    pub(crate) amount: StoredAmount,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_text"
    )]
    pub(crate) category: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_text"
    )]
    pub(crate) memo: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_text"
    )]
    pub(crate) date: Option<String>,
}

/// Reads any JSON value as optional text: null and `""` are absent, non-strings are stringified.
fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// A validated expense that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    amount: Amount,
    category: Option<String>,
    memo: Option<String>,
}

impl NewTransaction {
    /// Validates a new expense. Negative amounts are rejected; refunds are not modeled. Blank
    /// categories and memos are treated as absent.
    pub fn new(amount: Amount, category: Option<&str>, memo: Option<&str>) -> Result<Self> {
        if amount.is_negative() {
            return Err(Error::msg(
                ErrorType::Validation,
                format!("The amount cannot be negative, got {}", amount.to_plain_string()),
            ));
        }
        Ok(Self {
            amount,
            category: non_blank(category),
            memo: non_blank(memo),
        })
    }

    /// Like `new`, but parses `amount` from user input such as `12.50` or `$1,200`.
    pub fn parse(amount: &str, category: Option<&str>, memo: Option<&str>) -> Result<Self> {
        let amount = Amount::from_str(amount).map_err(|_| {
            Error::msg(
                ErrorType::Validation,
                format!("'{}' is not a valid amount", amount.trim()),
            )
        })?;
        Self::new(amount, category, memo)
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    /// Builds the record to store, dated `date`.
    pub(crate) fn into_record(self, date: NaiveDate) -> TransactionRecord {
        TransactionRecord {
            amount: StoredAmount::Parsed(self.amount),
            category: self.category,
            memo: self.memo,
            date: Some(date.format(DATE_FORMAT).to_string()),
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// An immutable snapshot of a user's transactions.
///
/// Cloning is cheap. A snapshot never changes; the `TransactionManager` replaces it wholesale when
/// the remote store delivers a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transactions {
    data: Arc<Vec<Transaction>>,
}

impl Transactions {
    pub fn new(data: Vec<Transaction>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Decodes the value found at `transactions/{uid}`, mapping each child key to a transaction
    /// `id`. Null (no transactions) decodes to an empty collection. Children that are not records
    /// are skipped with a warning.
    pub fn from_snapshot(value: &Value) -> Self {
        let children: Vec<(String, &Value)> = match value {
            Value::Null => Vec::new(),
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            // the store turns objects with small integer keys into arrays
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(ix, v)| (ix.to_string(), v))
                .collect(),
            other => {
                warn!("Expected a collection of transactions but found '{other}'");
                Vec::new()
            }
        };

        let mut data = Vec::with_capacity(children.len());
        for (key, child) in children {
            match TransactionRecord::deserialize(child) {
                Ok(record) => data.push(Transaction::from_record(key, record)),
                Err(e) => warn!("Skipping malformed transaction {key}: {e}"),
            }
        }
        Self::new(data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.data.iter()
    }

    pub fn as_slice(&self) -> &[Transaction] {
        self.data.as_slice()
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.data.iter().find(|t| t.id() == id)
    }

    /// Most recent first: by `date` descending, then by `id` descending (generated ids sort in
    /// creation order). Undated transactions come last.
    pub fn recent(&self) -> Vec<Transaction> {
        let mut sorted = self.data.as_ref().clone();
        sorted.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
        sorted
    }

    pub fn to_vec(&self) -> Vec<Transaction> {
        self.data.as_ref().clone()
    }
}

impl<'a> IntoIterator for &'a Transactions {
    type Item = &'a Transaction;
    type IntoIter = std::slice::Iter<'a, Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
