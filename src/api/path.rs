//! Addresses of nodes in the remote store.

use crate::error::Res;
use anyhow::bail;
use std::fmt::{Display, Formatter};

/// The top-level node under which each user's transactions are kept.
pub const TRANSACTIONS: &str = "transactions";

/// Characters that the remote store does not allow in keys.
const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']'];

/// A slash-separated path such as `transactions/{uid}/{id}`.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root of the store.
    pub fn root() -> Self {
        Self::default()
    }

    /// `transactions/{uid}`: the collection holding one user's transactions.
    pub fn transactions(uid: &str) -> Res<Self> {
        Self::root().child(TRANSACTIONS)?.child(uid)
    }

    /// `transactions/{uid}/{id}`: exactly one transaction.
    pub fn record(uid: &str, id: &str) -> Res<Self> {
        Self::transactions(uid)?.child(id)
    }

    /// Parses a path like `/a/b/c` or `a/b`. Empty segments are ignored.
    pub fn parse(s: &str) -> Res<Self> {
        let mut path = Self::root();
        for segment in s.split('/').filter(|s| !s.is_empty()) {
            path = path.child(segment)?;
        }
        Ok(path)
    }

    /// Appends one key.
    pub fn child(&self, key: &str) -> Res<Self> {
        validate_key(key)?;
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Ok(Self { segments })
    }

    /// Appends all segments of `relative`.
    pub fn join(&self, relative: &StorePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment, i.e. the key of the addressed node.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// True if `self` equals `other` or contains it.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// True if a change at `changed` alters the value seen at `self`.
    pub fn is_affected_by(&self, changed: &StorePath) -> bool {
        self.contains(changed) || changed.contains(self)
    }
}

impl Display for StorePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

fn validate_key(key: &str) -> Res<()> {
    if key.trim().is_empty() {
        bail!("A key in the remote store cannot be empty");
    }
    if let Some(c) = key.chars().find(|c| FORBIDDEN.contains(c) || c.is_control()) {
        bail!("The key '{key}' contains the character '{c}', which is not allowed");
    }
    Ok(())
}
