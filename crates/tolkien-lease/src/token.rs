//! Value types stored in the pool and tombstone keyspaces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier leased to a consuming service. Primary key in both keyspaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Live pool record, stored as JSON under the token key.
///
/// `blocked` is true exactly when `service_id` is non-empty; `counter` holds the
/// remaining lease seconds and is only meaningful while blocked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(rename = "serviceID", default)]
    pub service_id: String,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub counter: u64,
}

impl TokenRecord {
    /// A fresh, unassigned record.
    pub fn free() -> Self {
        Self::default()
    }

    pub fn leased(service_id: impl Into<String>, lease_secs: u64) -> Self {
        Self {
            service_id: service_id.into(),
            blocked: true,
            counter: lease_secs,
        }
    }

    pub fn is_leased_by(&self, service_id: &str) -> bool {
        self.blocked && self.service_id == service_id
    }

    /// Same lease, different remaining time.
    pub fn with_counter(&self, counter: u64) -> Self {
        Self {
            counter,
            ..self.clone()
        }
    }
}

/// A record as read from the pool, together with the store revision needed to
/// update it conditionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub token: Token,
    pub record: TokenRecord,
    pub revision: u64,
}

/// Permanent marker for a released token. Never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    #[serde(rename = "serviceID")]
    pub service_id: String,
    #[serde(rename = "deletedAt")]
    pub deleted_at: DateTime<Utc>,
}
