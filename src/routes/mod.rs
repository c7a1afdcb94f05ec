pub mod queue;
pub mod submissions;

use axum::Router;
use axum::routing::{get, post};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/queue", get(queue::list))
        .route("/api/v1/queue/stats", get(queue::stats))
        .route("/api/v1/queue/drain", post(queue::drain))
        .route("/api/v1/queue/{id}", get(queue::get).delete(queue::delete))
        .route("/api/v1/queue/{id}/requeue", post(queue::requeue))
}

pub fn ingest_routes() -> Router<SharedState> {
    Router::new().route("/v1/submissions/{destination}", post(submissions::submit))
}
