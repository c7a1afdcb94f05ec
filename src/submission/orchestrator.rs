use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::db::{self, QueueStore};
use crate::delivery::{Deliver, DeliveryError};
use crate::error::QueueError;
use crate::identity::{self, RecordId};
use crate::models::{EnqueueOptions, QueueEntry};
use crate::queue::{DrainSummary, Processor};

pub const DEFAULT_IMMEDIATE_ATTEMPTS: u32 = 3;
pub const DEFAULT_IMMEDIATE_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deliveries tried inline before falling back to the durable queue.
    pub immediate_attempts: u32,
    /// Pause before the n-th inline retry is `retry_delay * n`.
    pub retry_delay: Duration,
    pub delivery_timeout: Duration,
    /// Payload fields that identify the submitter, in hashing order.
    pub identity_fields: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            immediate_attempts: DEFAULT_IMMEDIATE_ATTEMPTS,
            retry_delay: DEFAULT_IMMEDIATE_RETRY_DELAY,
            delivery_timeout: Duration::from_secs(30),
            identity_fields: vec!["email".to_string(), "phone".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub destination: String,
    pub payload: serde_json::Value,
    pub options: EnqueueOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Delivered {
        record_id: RecordId,
        confirmation_code: String,
    },
    /// Not delivered yet; the queue will keep retrying.
    Queued {
        entry_id: Uuid,
        record_id: RecordId,
        confirmation_code: String,
    },
    /// The destination refused the payload; nothing was queued.
    Rejected { error: String },
}

/// Front door for form submissions: deliver now if possible, otherwise park
/// the submission in the durable queue.
pub struct Orchestrator {
    delivery: Arc<dyn Deliver>,
    processor: Option<Processor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// `processor` is `None` when no durable store is available; submissions
    /// are then delivered inline only.
    pub fn new(
        delivery: Arc<dyn Deliver>,
        processor: Option<Processor>,
        config: OrchestratorConfig,
    ) -> Self {
        if processor.is_none() {
            tracing::warn!("No durable queue available, submissions will be delivered inline only");
        }
        Self {
            delivery,
            processor,
            config,
        }
    }

    pub fn store(&self) -> Result<&QueueStore, QueueError> {
        self.processor
            .as_ref()
            .map(Processor::store)
            .ok_or_else(unavailable)
    }

    pub fn has_queue(&self) -> bool {
        self.processor.is_some()
    }

    pub async fn submit(&self, submission: Submission) -> Result<SubmissionOutcome, QueueError> {
        // Inline attempts and any queued retries share this entry, and with it
        // the record id.
        let draft = QueueEntry::new(
            &submission.destination,
            &submission.payload,
            submission.options,
        );
        let record_id = self.record_id(&draft);
        let confirmation_code = identity::generate_confirmation_code();

        let attempts = self.config.immediate_attempts;
        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(
                self.config.delivery_timeout,
                self.delivery
                    .deliver(&draft.payload, &draft.destination, &draft),
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
                    tracing::info!(
                        "Submission for {} delivered inline (record {record_id})",
                        draft.destination
                    );
                    return Ok(SubmissionOutcome::Delivered {
                        record_id,
                        confirmation_code,
                    });
                }
                Err(DeliveryError::Permanent(error)) => {
                    tracing::warn!("Submission for {} rejected: {error}", draft.destination);
                    return Ok(SubmissionOutcome::Rejected { error });
                }
                Err(DeliveryError::Retryable(error)) => {
                    tracing::debug!(
                        "Inline delivery {attempt}/{attempts} for {} failed: {error}",
                        draft.destination
                    );
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }
        }

        let entry_id = self.enqueue(&draft).await?;
        Ok(SubmissionOutcome::Queued {
            entry_id,
            record_id,
            confirmation_code,
        })
    }

    /// Queue a submission without trying to deliver it first.
    pub async fn capture(&self, submission: Submission) -> Result<SubmissionOutcome, QueueError> {
        let entry = QueueEntry::new(
            &submission.destination,
            &submission.payload,
            submission.options,
        );
        let entry_id = self.enqueue(&entry).await?;
        Ok(SubmissionOutcome::Queued {
            entry_id,
            record_id: self.record_id(&entry),
            confirmation_code: identity::generate_confirmation_code(),
        })
    }

    /// Run one pass over the durable queue.
    pub async fn drain(&self) -> Result<DrainSummary, QueueError> {
        let processor = self.processor.as_ref().ok_or_else(unavailable)?;
        processor.process_queue(self.delivery.as_ref()).await
    }

    async fn enqueue(&self, entry: &QueueEntry) -> Result<Uuid, QueueError> {
        let store = self.store()?;
        db::queue::insert(store.pool(), entry).await?;
        tracing::info!(
            "Submission for {} queued as entry {}",
            entry.destination,
            entry.id
        );
        Ok(entry.id)
    }

    fn record_id(&self, entry: &QueueEntry) -> RecordId {
        identity::record_id_from_payload(
            &entry.destination,
            &entry.payload,
            &self.config.identity_fields,
            entry.id,
        )
    }
}

fn unavailable() -> QueueError {
    QueueError::StoreUnavailable("durable queue is not configured".to_string())
}
