pub mod webhook;

use async_trait::async_trait;

use crate::models::QueueEntry;

/// Why a delivery attempt did not land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth trying again later (network trouble, 5xx, timeouts).
    Retryable(String),
    /// The destination will never accept this payload as-is.
    Permanent(String),
}

impl DeliveryError {
    pub fn retryable(message: impl Into<String>) -> Self {
        DeliveryError::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        DeliveryError::Permanent(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            DeliveryError::Retryable(msg) | DeliveryError::Permanent(msg) => msg,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for DeliveryError {}

/// Pushes one submission to its remote destination.
///
/// Implementations must return `Ok(())` only once the destination has
/// accepted the payload, and should write through an idempotent key so that
/// a repeated delivery converges on the same remote record.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(
        &self,
        payload: &serde_json::Value,
        destination: &str,
        entry: &QueueEntry,
    ) -> Result<(), DeliveryError>;
}
