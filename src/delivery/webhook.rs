use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::json;

use super::{Deliver, DeliveryError};
use crate::identity;
use crate::models::QueueEntry;

/// Upserts submissions into a remote record service over HTTP:
/// `PUT {base}/{destination}/records/{record_id}`.
pub struct WebhookDelivery {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    identity_fields: Vec<String>,
}

impl WebhookDelivery {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        identity_fields: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, String> {
        let base_url =
            Url::parse(base_url).map_err(|e| format!("Invalid destination URL '{base_url}': {e}"))?;
        if base_url.cannot_be_a_base() {
            return Err(format!("Destination URL '{base_url}' cannot be a base"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            client,
            base_url,
            token,
            identity_fields,
        })
    }

    fn record_url(&self, destination: &str, record_id: &str) -> Result<Url, DeliveryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DeliveryError::permanent("Destination URL cannot be a base"))?
            .pop_if_empty()
            .extend([destination, "records", record_id]);
        Ok(url)
    }
}

#[async_trait]
impl Deliver for WebhookDelivery {
    async fn deliver(
        &self,
        payload: &serde_json::Value,
        destination: &str,
        entry: &QueueEntry,
    ) -> Result<(), DeliveryError> {
        let record_id = identity::record_id_from_payload(
            destination,
            payload,
            &self.identity_fields,
            entry.id,
        );
        let url = self.record_url(destination, record_id.as_str())?;

        let body = json!({
            "record_id": record_id.as_str(),
            "data": payload,
            "classification": entry.classification,
            "actor_id": entry.actor_id,
            "submitted_at": entry.created_at,
        });

        let mut req = self
            .client
            .put(url)
            .header("Idempotency-Key", record_id.as_str())
            .json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DeliveryError::retryable(format!("Destination request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!("Delivered record {record_id} to {destination} ({status})");
            return Ok(());
        }

        let detail = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect::<String>();
        let message = format!("Destination responded {}: {detail}", status.as_u16());

        if is_permanent(status) {
            Err(DeliveryError::Permanent(message))
        } else {
            Err(DeliveryError::Retryable(message))
        }
    }
}

/// Client errors mean the payload itself was refused, except for the ones
/// that ask the caller to come back later.
fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
        && status != StatusCode::CONFLICT
}
