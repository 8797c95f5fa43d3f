//! Types that represent the core data model, such as `Transaction` and `Amount`.
mod amount;
mod category;
mod transaction;

pub use amount::{format_money, round_money, Amount, AmountError, StoredAmount};
pub use category::{category_label, SuggestedCategory, UNCATEGORIZED};
pub use transaction::{NewTransaction, Transaction, Transactions};
