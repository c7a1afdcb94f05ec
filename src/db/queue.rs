use chrono::{DateTime, Utc};
use sqlx::Sqlite;
use uuid::Uuid;

use super::QueueStore;
use crate::error::QueueError;
use crate::models::queue_entry::QueueEntryRow;
use crate::models::{EnqueueOptions, EntryStatus, EntryUpdate, QueueEntry};

/// Persist a deep copy of `payload` as a new pending entry and return its id.
pub async fn enqueue(
    store: &QueueStore,
    payload: &serde_json::Value,
    destination: &str,
    options: EnqueueOptions,
) -> Result<Uuid, QueueError> {
    let entry = QueueEntry::new(destination, payload, options);
    insert(store.pool(), &entry).await?;

    tracing::debug!(
        "Enqueued entry {} for destination {} ({})",
        entry.id,
        entry.destination,
        entry.classification.as_str()
    );

    Ok(entry.id)
}

/// Write `entry` as-is. Runs on the pool or inside an open transaction.
pub(crate) async fn insert<'e, E>(executor: E, entry: &QueueEntry) -> Result<(), QueueError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let payload = serde_json::to_string(&entry.payload)?;

    sqlx::query(
        "INSERT INTO queue_entries
             (id, destination, payload, classification, actor_id, created_at,
              attempts, last_attempt_at, next_retry_at, status, last_error, lease_until)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(entry.id.to_string())
    .bind(&entry.destination)
    .bind(payload)
    .bind(entry.classification.as_str())
    .bind(&entry.actor_id)
    .bind(entry.created_at.timestamp_millis())
    .bind(i64::from(entry.attempts))
    .bind(entry.last_attempt_at.map(|t| t.timestamp_millis()))
    .bind(entry.next_retry_at.map(|t| t.timestamp_millis()))
    .bind(entry.status.as_str())
    .bind(&entry.last_error)
    .bind(entry.lease_until.map(|t| t.timestamp_millis()))
    .execute(executor)
    .await?;

    Ok(())
}

/// Remove an entry. Removing an id that is not stored is a no-op.
pub async fn dequeue(store: &QueueStore, id: Uuid) -> Result<(), QueueError> {
    sqlx::query("DELETE FROM queue_entries WHERE id = ?1")
        .bind(id.to_string())
        .execute(store.pool())
        .await?;
    Ok(())
}

pub async fn get(store: &QueueStore, id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
    sqlx::query_as::<_, QueueEntryRow>("SELECT * FROM queue_entries WHERE id = ?1")
        .bind(id.to_string())
        .fetch_optional(store.pool())
        .await?
        .map(QueueEntry::try_from)
        .transpose()
}

/// All entries with `status`, in store order.
pub async fn list_by_status(
    store: &QueueStore,
    status: EntryStatus,
) -> Result<Vec<QueueEntry>, QueueError> {
    sqlx::query_as::<_, QueueEntryRow>("SELECT * FROM queue_entries WHERE status = ?1")
        .bind(status.as_str())
        .fetch_all(store.pool())
        .await?
        .into_iter()
        .map(QueueEntry::try_from)
        .collect()
}

/// Merge `changes` into an existing entry and return the stored result.
///
/// The merge happens in a single statement so it takes the write lock up
/// front instead of upgrading a read.
pub async fn update(
    store: &QueueStore,
    id: Uuid,
    changes: EntryUpdate,
) -> Result<QueueEntry, QueueError> {
    let row = sqlx::query_as::<_, QueueEntryRow>(
        "UPDATE queue_entries
         SET status = COALESCE(?2, status),
             attempts = COALESCE(?3, attempts),
             last_attempt_at = CASE WHEN ?4 THEN ?5 ELSE last_attempt_at END,
             next_retry_at = CASE WHEN ?6 THEN ?7 ELSE next_retry_at END,
             last_error = CASE WHEN ?8 THEN ?9 ELSE last_error END,
             lease_until = CASE WHEN ?10 THEN ?11 ELSE lease_until END
         WHERE id = ?1
         RETURNING *",
    )
    .bind(id.to_string())
    .bind(changes.status.map(|s| s.as_str()))
    .bind(changes.attempts.map(i64::from))
    .bind(changes.last_attempt_at.is_some())
    .bind(millis(changes.last_attempt_at))
    .bind(changes.next_retry_at.is_some())
    .bind(millis(changes.next_retry_at))
    .bind(changes.last_error.is_some())
    .bind(changes.last_error.flatten())
    .bind(changes.lease_until.is_some())
    .bind(millis(changes.lease_until))
    .fetch_optional(store.pool())
    .await?
    .ok_or(QueueError::NotFound(id))?;

    QueueEntry::try_from(row)
}

fn millis(change: Option<Option<DateTime<Utc>>>) -> Option<i64> {
    change.flatten().map(|t| t.timestamp_millis())
}

/// Delete every entry. Returns how many were removed.
pub async fn clear(store: &QueueStore) -> Result<u64, QueueError> {
    let result = sqlx::query("DELETE FROM queue_entries")
        .execute(store.pool())
        .await?;
    Ok(result.rows_affected())
}

pub async fn count(store: &QueueStore, status: EntryStatus) -> Result<i64, QueueError> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM queue_entries WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(store.pool())
            .await?;
    Ok(count)
}

/// Atomically move a pending entry into `processing`, consuming one attempt.
///
/// The update only applies while the entry is still pending with the attempt
/// count the caller observed, so two drains racing on the same entry cannot
/// both claim it. Returns `None` when the claim was lost.
pub async fn claim(
    store: &QueueStore,
    id: Uuid,
    observed_attempts: u32,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
) -> Result<Option<QueueEntry>, QueueError> {
    sqlx::query_as::<_, QueueEntryRow>(
        "UPDATE queue_entries
         SET status = 'processing', attempts = attempts + 1, last_attempt_at = ?3,
             next_retry_at = NULL, lease_until = ?4
         WHERE id = ?1 AND status = 'pending' AND attempts = ?2
         RETURNING *",
    )
    .bind(id.to_string())
    .bind(i64::from(observed_attempts))
    .bind(now.timestamp_millis())
    .bind(lease_until.timestamp_millis())
    .fetch_optional(store.pool())
    .await?
    .map(QueueEntry::try_from)
    .transpose()
}

/// Return `processing` entries whose lease ran out to `pending`. The attempt
/// they consumed stays counted.
pub async fn release_expired_leases(
    store: &QueueStore,
    now: DateTime<Utc>,
) -> Result<u64, QueueError> {
    let result = sqlx::query(
        "UPDATE queue_entries
         SET status = 'pending', lease_until = NULL,
             last_error = COALESCE(last_error, 'Delivery interrupted')
         WHERE status = 'processing' AND (lease_until IS NULL OR lease_until <= ?1)",
    )
    .bind(now.timestamp_millis())
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected())
}

/// Put a terminally failed submission back in line as a brand-new entry with
/// a fresh attempt budget. The failed entry is removed. Returns the new id.
pub async fn requeue(store: &QueueStore, id: Uuid) -> Result<Uuid, QueueError> {
    let failed = get(store, id).await?.ok_or(QueueError::NotFound(id))?;
    if failed.status != EntryStatus::Failed {
        return Err(QueueError::InvalidState(format!(
            "entry {id} is {}, only failed entries can be requeued",
            failed.status
        )));
    }

    let mut fresh = QueueEntry::new(
        &failed.destination,
        &failed.payload,
        EnqueueOptions {
            classification: failed.classification,
            actor_id: failed.actor_id.clone(),
        },
    );
    fresh.created_at = failed.created_at;

    let mut tx = store.pool().begin().await?;

    let removed = sqlx::query("DELETE FROM queue_entries WHERE id = ?1 AND status = 'failed'")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    if removed.rows_affected() == 0 {
        return Err(QueueError::InvalidState(format!(
            "entry {id} changed while being requeued"
        )));
    }

    insert(&mut *tx, &fresh).await?;

    tx.commit().await?;

    tracing::info!("Requeued failed entry {id} as {}", fresh.id);

    Ok(fresh.id)
}
