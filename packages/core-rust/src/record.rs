//! Ledger record types.
//!
//! Defines [`Record`], the unit stored by every backend, its closed
//! [`RecordStatus`] set, and [`NewRecord`], the creation payload whose
//! required fields are checked before anything is written.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Lifecycle state of a ledger record.
///
/// `Pending` is the only state a record can be created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl RecordStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Paid, Self::Failed, Self::Refunded];

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::InvalidStatus {
                value: s.to_string(),
            })
    }
}

/// A ledger entry.
///
/// Serialized with camelCase field names. Unknown fields are rejected, which
/// keeps engine-private metadata and stray top-level writes out of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Record {
    /// Natural identifier, unique and immutable.
    pub key: String,
    /// Non-unique grouping identifier (thread, channel, ...).
    pub secondary_key: String,
    pub amount: u64,
    pub status: RecordStatus,
    /// Reference to the resource that initiated the transaction.
    pub link_id: String,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque provider payload.
    #[serde(default)]
    pub raw: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Record {
    /// Field names that no update may change.
    pub const IMMUTABLE_FIELDS: [&'static str; 3] = ["key", "createdAt", "updatedAt"];

    /// JSON object form of the record, as seen by path lookups and projections.
    #[must_use]
    pub fn to_document(&self) -> Value {
        // Record contains only JSON-representable fields.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rebuilds a record from its document form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` when `status` is outside the enumerated set and
    /// `InvalidUpdateData` for any other shape violation.
    pub fn from_document(document: Value) -> Result<Self, StoreError> {
        if let Some(status) = document.get("status") {
            match status {
                Value::String(s) => {
                    s.parse::<RecordStatus>()?;
                }
                other => {
                    return Err(StoreError::InvalidStatus {
                        value: other.to_string(),
                    })
                }
            }
        }
        serde_json::from_value(document).map_err(|e| StoreError::InvalidUpdateData {
            reason: e.to_string(),
        })
    }
}

/// Creation payload for [`Record`].
///
/// Required fields are optional here so that a missing field is reported as
/// `MissingFields` instead of failing at deserialization time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub key: String,
    #[serde(default)]
    pub secondary_key: Option<String>,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub raw: Option<Value>,
}

impl NewRecord {
    /// Starts a payload for `key` with every other field unset.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn secondary_key(mut self, secondary_key: impl Into<String>) -> Self {
        self.secondary_key = Some(secondary_key.into());
        self
    }

    #[must_use]
    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    #[must_use]
    pub fn link_id(mut self, link_id: impl Into<String>) -> Self {
        self.link_id = Some(link_id.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Validates the key shape: non-empty after trimming.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for an empty or whitespace-only key.
    pub fn validate_key(&self) -> Result<(), StoreError> {
        validate_key(&self.key)
    }

    /// Turns the payload into a `Pending` record stamped with `now`.
    ///
    /// # Errors
    ///
    /// Returns `MissingFields` naming every absent required field. Empty
    /// strings count as absent.
    pub fn into_record(self, now: i64) -> Result<Record, StoreError> {
        self.validate_key()?;

        let secondary_key = self.secondary_key.filter(|s| !s.is_empty());
        let link_id = self.link_id.filter(|s| !s.is_empty());

        let mut missing = Vec::new();
        if secondary_key.is_none() {
            missing.push("secondaryKey");
        }
        if self.amount.is_none() {
            missing.push("amount");
        }
        if link_id.is_none() {
            missing.push("linkId");
        }

        match (secondary_key, self.amount, link_id) {
            (Some(secondary_key), Some(amount), Some(link_id)) => Ok(Record {
                key: self.key,
                secondary_key,
                amount,
                status: RecordStatus::Pending,
                link_id,
                completed_at: None,
                description: self.description,
                raw: self.raw,
                created_at: now,
                updated_at: now,
            }),
            _ => Err(StoreError::MissingFields { fields: missing }),
        }
    }
}

/// Checks that a record key is usable.
///
/// # Errors
///
/// Returns `InvalidKey` for an empty or whitespace-only key.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.trim().is_empty() {
        return Err(StoreError::InvalidKey {
            reason: "key must be a non-empty string".to_string(),
        });
    }
    Ok(())
}
