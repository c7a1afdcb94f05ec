use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::backoff::Backoff;
use crate::db::{self, QueueStore};
use crate::delivery::{Deliver, DeliveryError};
use crate::error::QueueError;
use crate::models::queue_entry::{after, now_millis};
use crate::models::{EntryStatus, EntryUpdate, QueueEntry};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LEASE: Duration = Duration::from_secs(120);
pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Attempts an entry may consume before it is parked as `failed`.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub delivery_timeout: Duration,
    /// How long a `processing` claim holds before another drain may recover it.
    pub lease: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            lease: DEFAULT_LEASE,
        }
    }
}

/// Result of one `process_entry` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Delivered and removed from the store.
    Delivered,
    /// Skipped: the entry was not pending.
    NotPending(EntryStatus),
    /// Skipped: the entry is waiting out its backoff.
    NotDue(DateTime<Utc>),
    /// Skipped: another drain claimed the entry first.
    AlreadyClaimed,
    /// The attempt budget was already spent; the entry is now `failed`.
    Exhausted,
    /// Delivery failed and will be retried at `next_retry_at`.
    RetryScheduled {
        error: String,
        next_retry_at: DateTime<Utc>,
    },
    /// The destination refused the payload for good; the entry is now `failed`.
    Rejected { error: String },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Delivered)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProcessOutcome::RetryScheduled { error, .. } | ProcessOutcome::Rejected { error } => {
                Some(error)
            }
            ProcessOutcome::Exhausted => Some(MAX_RETRIES_EXCEEDED),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives queue entries through pending → processing → {removed, pending, failed}.
#[derive(Debug, Clone)]
pub struct Processor {
    store: QueueStore,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(store: QueueStore, config: ProcessorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Make one delivery attempt for `entry`.
    ///
    /// Delivery failures are folded into the returned outcome; only store
    /// failures surface as `Err`.
    pub async fn process_entry<D>(
        &self,
        entry: &QueueEntry,
        deliver: &D,
    ) -> Result<ProcessOutcome, QueueError>
    where
        D: Deliver + ?Sized,
    {
        if entry.status != EntryStatus::Pending {
            return Ok(ProcessOutcome::NotPending(entry.status));
        }

        let now = now_millis();
        if let Some(at) = entry.next_retry_at.filter(|_| !entry.is_due(now)) {
            return Ok(ProcessOutcome::NotDue(at));
        }

        if entry.attempts >= self.config.max_retries {
            db::queue::update(
                &self.store,
                entry.id,
                EntryUpdate {
                    status: Some(EntryStatus::Failed),
                    next_retry_at: Some(None),
                    last_error: Some(Some(MAX_RETRIES_EXCEEDED.to_string())),
                    ..Default::default()
                },
            )
            .await?;
            tracing::error!(
                "Entry {} for {} failed permanently after {} attempts",
                entry.id,
                entry.destination,
                entry.attempts
            );
            return Ok(ProcessOutcome::Exhausted);
        }

        let lease_until = after(now, self.config.lease);
        let Some(claimed) =
            db::queue::claim(&self.store, entry.id, entry.attempts, now, lease_until).await?
        else {
            tracing::debug!("Entry {} already claimed elsewhere", entry.id);
            return Ok(ProcessOutcome::AlreadyClaimed);
        };

        tracing::debug!(
            "Delivering entry {} to {} (attempt {})",
            claimed.id,
            claimed.destination,
            claimed.attempts
        );

        let result = match tokio::time::timeout(
            self.config.delivery_timeout,
            deliver.deliver(&claimed.payload, &claimed.destination, &claimed),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::retryable(format!(
                "Delivery timed out after {}s",
                self.config.delivery_timeout.as_secs()
            ))),
        };

        match result {
            Ok(()) => {
                db::queue::dequeue(&self.store, claimed.id).await?;
                tracing::info!("Delivered entry {} to {}", claimed.id, claimed.destination);
                Ok(ProcessOutcome::Delivered)
            }
            Err(DeliveryError::Permanent(error)) => {
                db::queue::update(
                    &self.store,
                    claimed.id,
                    EntryUpdate {
                        status: Some(EntryStatus::Failed),
                        last_error: Some(Some(error.clone())),
                        lease_until: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
                tracing::error!("Entry {} rejected by {}: {error}", claimed.id, claimed.destination);
                Ok(ProcessOutcome::Rejected { error })
            }
            Err(DeliveryError::Retryable(error)) => {
                let delay = self.config.backoff.delay(claimed.attempts);
                let next_retry_at = after(now_millis(), delay);
                db::queue::update(
                    &self.store,
                    claimed.id,
                    EntryUpdate {
                        status: Some(EntryStatus::Pending),
                        next_retry_at: Some(Some(next_retry_at)),
                        last_error: Some(Some(error.clone())),
                        lease_until: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
                tracing::warn!(
                    "Delivery of entry {} failed (attempt {}), retrying at {next_retry_at}: {error}",
                    claimed.id,
                    claimed.attempts
                );
                Ok(ProcessOutcome::RetryScheduled {
                    error,
                    next_retry_at,
                })
            }
        }
    }

    /// Attempt every pending entry once, one at a time.
    pub async fn process_queue<D>(&self, deliver: &D) -> Result<DrainSummary, QueueError>
    where
        D: Deliver + ?Sized,
    {
        let recovered = db::queue::release_expired_leases(&self.store, now_millis()).await?;
        if recovered > 0 {
            tracing::warn!("Recovered {recovered} entries with expired processing leases");
        }

        let entries = db::queue::list_by_status(&self.store, EntryStatus::Pending).await?;
        let mut summary = DrainSummary::default();

        for entry in &entries {
            summary.processed += 1;
            match self.process_entry(entry, deliver).await {
                Ok(outcome) if outcome.is_success() => summary.succeeded += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    tracing::error!("Failed to process queue entry {}: {e}", entry.id);
                    summary.failed += 1;
                }
            }
        }

        if summary.processed > 0 {
            tracing::info!(
                "Queue drain finished: {} processed, {} succeeded, {} failed",
                summary.processed,
                summary.succeeded,
                summary.failed
            );
        }

        Ok(summary)
    }
}
