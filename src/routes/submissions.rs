use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::identity::RecordId;
use crate::models::{Classification, EnqueueOptions};
use crate::state::SharedState;
use crate::submission::{Submission, SubmissionOutcome};

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub classification: Classification,
    pub actor_id: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitParams {
    /// Skip inline delivery and go straight to the queue.
    #[serde(default)]
    pub defer: bool,
}

pub async fn submit(
    State(state): State<SharedState>,
    Path(destination): Path<String>,
    Query(params): Query<SubmitParams>,
    Json(req): Json<SubmitRequest>,
) -> Result<Response, AppError> {
    if !req.payload.is_object() {
        return Err(AppError::BadRequest("payload must be a JSON object".to_string()));
    }

    let options = match (req.classification, req.actor_id) {
        (Classification::Authenticated, Some(actor)) if !actor.trim().is_empty() => {
            EnqueueOptions::authenticated(actor)
        }
        (Classification::Authenticated, _) => {
            return Err(AppError::BadRequest(
                "actor_id is required for authenticated submissions".to_string(),
            ));
        }
        (Classification::Anonymous, _) => EnqueueOptions::anonymous(),
    };

    let submission = Submission {
        destination,
        payload: req.payload,
        options,
    };

    let outcome = if params.defer {
        state.orchestrator.capture(submission).await?
    } else {
        state.orchestrator.submit(submission).await?
    };

    let response = match outcome {
        SubmissionOutcome::Delivered {
            record_id,
            confirmation_code,
        } => (
            StatusCode::CREATED,
            Json(json!({
                "status": "delivered",
                "record_id": public_record_id(&record_id),
                "confirmation_code": confirmation_code,
            })),
        )
            .into_response(),
        SubmissionOutcome::Queued {
            entry_id,
            record_id,
            confirmation_code,
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "queued",
                "message": "Submission received and will be retried automatically",
                "entry_id": entry_id,
                "record_id": public_record_id(&record_id),
                "confirmation_code": confirmation_code,
            })),
        )
            .into_response(),
        SubmissionOutcome::Rejected { error } => return Err(AppError::Unprocessable(error)),
    };

    Ok(response)
}

/// Random fallback ids are not what the destination will store, so they are
/// not reported.
fn public_record_id(record_id: &RecordId) -> Option<&str> {
    record_id.is_deterministic().then(|| record_id.as_str())
}
