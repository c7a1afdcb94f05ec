pub mod config;
pub mod error;
pub mod state;
pub mod db;
pub mod models;
pub mod queue;
pub mod delivery;
pub mod identity;
pub mod submission;
pub mod routes;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::QueueStore;
use crate::delivery::webhook::WebhookDelivery;
use crate::error::QueueError;
use crate::queue::Processor;
use crate::state::{AppState, SharedState};
use crate::submission::Orchestrator;

/// Open the durable queue and wire the delivery pipeline. When the host has
/// no usable durable storage the orchestrator runs inline-only.
pub async fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>, String> {
    let delivery = WebhookDelivery::new(
        &config.destination_url,
        config.destination_token.clone(),
        config.identity_fields.clone(),
        config.delivery_timeout,
    )?;

    let processor = match QueueStore::init(&config.database_url).await {
        Ok(store) => {
            tracing::info!("Durable queue opened at {}", config.database_url);
            Some(Processor::new(store, config.processor_config()))
        }
        Err(QueueError::StoreUnavailable(reason)) => {
            tracing::warn!("Durable queue unavailable: {reason}");
            None
        }
        Err(e) => return Err(format!("Failed to open queue store: {e}")),
    };

    Ok(Arc::new(Orchestrator::new(
        Arc::new(delivery),
        processor,
        config.orchestrator_config(),
    )))
}

pub fn build_app(orchestrator: Arc<Orchestrator>, config: Config) -> Router {
    let max_body_size = config.max_body_size;
    let state: SharedState = Arc::new(AppState {
        config,
        orchestrator,
    });

    Router::new()
        .merge(routes::api_routes())
        .merge(routes::ingest_routes())
        .route("/health", axum::routing::get(health))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
