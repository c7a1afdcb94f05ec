use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::error::AppError;
use crate::models::{EntryStatus, QueueEntry};
use crate::queue::DrainSummary;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<EntryStatus>,
}

/// Entries in one state; defaults to the `failed` ones operators care about.
pub async fn list(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = state.orchestrator.store()?;
    let status = params.status.unwrap_or(EntryStatus::Failed);
    let entries = db::queue::list_by_status(store, status).await?;

    Ok(Json(json!({
        "status": status,
        "total": entries.len(),
        "entries": entries,
    })))
}

pub async fn stats(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, AppError> {
    let store = state.orchestrator.store()?;

    Ok(Json(json!({
        "pending": db::queue::count(store, EntryStatus::Pending).await?,
        "processing": db::queue::count(store, EntryStatus::Processing).await?,
        "failed": db::queue::count(store, EntryStatus::Failed).await?,
    })))
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueEntry>, AppError> {
    let store = state.orchestrator.store()?;
    let entry = db::queue::get(store, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue entry not found".to_string()))?;
    Ok(Json(entry))
}

pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let store = state.orchestrator.store()?;
    db::queue::dequeue(store, id).await?;
    tracing::info!("Queue entry {id} discarded by operator");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn requeue(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = state.orchestrator.store()?;
    let entry_id = db::queue::requeue(store, id).await?;
    Ok(Json(json!({ "entry_id": entry_id })))
}

pub async fn drain(State(state): State<SharedState>) -> Result<Json<DrainSummary>, AppError> {
    let summary = state.orchestrator.drain().await?;
    Ok(Json(summary))
}
