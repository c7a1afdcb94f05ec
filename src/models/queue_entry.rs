use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Processing => "processing",
            EntryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "processing" => Ok(EntryStatus::Processing),
            "failed" => Ok(EntryStatus::Failed),
            other => Err(QueueError::Malformed(format!("unknown status '{other}'"))),
        }
    }
}

/// Provenance of a submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Authenticated,
    #[default]
    Anonymous,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Authenticated => "authenticated",
            Classification::Anonymous => "anonymous",
        }
    }
}

impl FromStr for Classification {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authenticated" => Ok(Classification::Authenticated),
            "anonymous" => Ok(Classification::Anonymous),
            other => Err(QueueError::Malformed(format!(
                "unknown classification '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub classification: Classification,
    pub actor_id: Option<String>,
}

impl EnqueueOptions {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(actor_id: impl Into<String>) -> Self {
        Self {
            classification: Classification::Authenticated,
            actor_id: Some(actor_id.into()),
        }
    }
}

/// A submission waiting in (or parked in) the durable queue.
///
/// Serializes to the persisted record shape: camelCase keys, timestamps as
/// Unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: Uuid,
    pub destination: String,
    pub payload: serde_json::Value,
    pub classification: Classification,
    pub actor_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: EntryStatus,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub lease_until: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Build a fresh pending entry. `payload` is copied, so the caller's value
    /// can be mutated freely afterwards.
    pub fn new(destination: &str, payload: &serde_json::Value, options: EnqueueOptions) -> Self {
        Self {
            id: Uuid::now_v7(),
            destination: destination.to_string(),
            payload: payload.clone(),
            classification: options.classification,
            actor_id: options.actor_id,
            created_at: now_millis(),
            attempts: 0,
            last_attempt_at: None,
            next_retry_at: None,
            status: EntryStatus::Pending,
            last_error: None,
            lease_until: None,
        }
    }

    /// Whether a pending entry may be attempted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.is_none_or(|at| at <= now)
    }
}

/// Partial update merged into an existing entry. `None` leaves a field
/// untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub status: Option<EntryStatus>,
    pub attempts: Option<u32>,
    pub last_attempt_at: Option<Option<DateTime<Utc>>>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub last_error: Option<Option<String>>,
    pub lease_until: Option<Option<DateTime<Utc>>>,
}

/// Current time truncated to the millisecond precision the store keeps.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// `at + delay`, saturating at the latest representable instant.
pub fn after(at: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QueueEntryRow {
    pub id: String,
    pub destination: String,
    pub payload: String,
    pub classification: String,
    pub actor_id: Option<String>,
    pub created_at: i64,
    pub attempts: i64,
    pub last_attempt_at: Option<i64>,
    pub next_retry_at: Option<i64>,
    pub status: String,
    pub last_error: Option<String>,
    pub lease_until: Option<i64>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = QueueError;

    fn try_from(row: QueueEntryRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| QueueError::Malformed(format!("bad id '{}': {e}", row.id)))?;
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| QueueError::Malformed(format!("bad attempt count {}", row.attempts)))?;

        Ok(QueueEntry {
            id,
            destination: row.destination,
            payload: serde_json::from_str(&row.payload)?,
            classification: row.classification.parse()?,
            actor_id: row.actor_id,
            created_at: from_millis(row.created_at),
            attempts,
            last_attempt_at: row.last_attempt_at.map(from_millis),
            next_retry_at: row.next_retry_at.map(from_millis),
            status: row.status.parse()?,
            last_error: row.last_error,
            lease_until: row.lease_until.map(from_millis),
        })
    }
}
