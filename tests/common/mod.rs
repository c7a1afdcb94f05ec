#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::put;
use reqwest::Client;
use serde_json::{Value, json};
use uuid::Uuid;

use formrelay::config::Config;
use formrelay::db::QueueStore;
use formrelay::delivery::{Deliver, DeliveryError};
use formrelay::models::QueueEntry;
use formrelay::queue::{Backoff, Processor, ProcessorConfig};

/// A queue store backed by its own temporary database file.
pub struct TestStore {
    pub store: QueueStore,
    pub path: PathBuf,
}

impl TestStore {
    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("formrelay_test_{}.db", Uuid::now_v7().simple()))
}

pub async fn open_store() -> TestStore {
    let path = temp_db_path();
    let store = QueueStore::init(&format!("sqlite://{}", path.display()))
        .await
        .expect("Failed to open test queue store");
    TestStore { store, path }
}

/// Close the store and remove its database files.
pub async fn cleanup(test: TestStore) {
    test.store.close().await;
    remove_db_files(&test.path);
}

pub fn remove_db_files(path: &std::path::Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(file));
    }
}

pub fn test_processor_config() -> ProcessorConfig {
    ProcessorConfig {
        max_retries: 3,
        backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
        delivery_timeout: Duration::from_secs(5),
        lease: Duration::from_secs(30),
    }
}

pub fn processor(store: &QueueStore) -> Processor {
    Processor::new(store.clone(), test_processor_config())
}

/// In-process delivery double. Fails for the listed destinations and records
/// every call it receives.
#[derive(Default)]
pub struct ScriptedDelivery {
    pub failing: HashSet<String>,
    pub permanent: bool,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub attempted: Mutex<Vec<Uuid>>,
    pub delivered: Mutex<Vec<String>>,
}

impl ScriptedDelivery {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing_for(destinations: &[&str]) -> Self {
        Self {
            failing: destinations.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn rejecting_for(destinations: &[&str]) -> Self {
        Self {
            permanent: true,
            ..Self::failing_for(destinations)
        }
    }

    pub fn hanging(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempted(&self) -> Vec<Uuid> {
        self.attempted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deliver for ScriptedDelivery {
    async fn deliver(
        &self,
        _payload: &Value,
        destination: &str,
        entry: &QueueEntry,
    ) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempted.lock().unwrap().push(entry.id);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(destination) {
            let message = format!("{destination} unreachable");
            return Err(if self.permanent {
                DeliveryError::Permanent(message)
            } else {
                DeliveryError::Retryable(message)
            });
        }

        self.delivered.lock().unwrap().push(destination.to_string());
        Ok(())
    }
}

/// A fake remote record service that stores upserts keyed by record id.
pub struct Destination {
    pub addr: SocketAddr,
    pub status: Arc<AtomicU16>,
    pub received: Arc<Mutex<Vec<ReceivedWrite>>>,
}

#[derive(Debug, Clone)]
pub struct ReceivedWrite {
    pub scope: String,
    pub record_id: String,
    pub idempotency_key: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct DestinationState {
    status: Arc<AtomicU16>,
    received: Arc<Mutex<Vec<ReceivedWrite>>>,
}

impl Destination {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Status code the next writes will be answered with.
    pub fn respond_with(&self, status: StatusCode) {
        self.status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<ReceivedWrite> {
        self.received.lock().unwrap().clone()
    }

    /// Distinct records the destination holds after merge-upserting.
    pub fn record_ids(&self) -> HashSet<String> {
        self.writes().into_iter().map(|w| w.record_id).collect()
    }
}

async fn upsert_record(
    State(state): State<DestinationState>,
    Path((scope, record_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_success() {
        state.received.lock().unwrap().push(ReceivedWrite {
            scope,
            record_id,
            idempotency_key: headers
                .get("idempotency-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
    }

    (status, Json(json!({ "status": status.as_u16() })))
}

pub async fn spawn_destination() -> Destination {
    let state = DestinationState {
        status: Arc::new(AtomicU16::new(200)),
        received: Arc::new(Mutex::new(Vec::new())),
    };

    let app = axum::Router::new()
        .route("/{scope}/records/{record_id}", put(upsert_record))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind destination");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Destination failed");
    });

    Destination {
        addr,
        status: state.status,
        received: state.received,
    }
}

/// A running relay instance wired to a fake destination.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub destination: Destination,
    pub orchestrator: Arc<formrelay::submission::Orchestrator>,
    pub db_path: PathBuf,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn store(&self) -> &QueueStore {
        self.orchestrator.store().expect("test app has a queue")
    }

    pub async fn submit(&self, destination: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(&format!("/v1/submissions/{destination}")))
            .json(body)
            .send()
            .await
            .expect("submit request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn delete(&self, path: &str) -> StatusCode {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("delete request failed")
            .status()
    }
}

pub fn test_config(database_url: String, destination_url: String) -> Config {
    Config {
        database_url,
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        destination_url,
        destination_token: None,
        identity_fields: vec!["email".to_string(), "phone".to_string()],
        max_retries: 3,
        backoff_base: Duration::from_secs(1),
        backoff_cap: Duration::from_secs(60),
        delivery_timeout: Duration::from_secs(5),
        lease: Duration::from_secs(30),
        immediate_attempts: 1,
        drain_interval: Duration::from_secs(3600),
        max_body_size: 1_048_576,
        log_level: "warn".to_string(),
    }
}

pub async fn spawn_app() -> TestApp {
    let destination = spawn_destination().await;
    let db_path = temp_db_path();
    let config = test_config(format!("sqlite://{}", db_path.display()), destination.url());

    let orchestrator = formrelay::build_orchestrator(&config)
        .await
        .expect("Failed to build orchestrator");
    let app = formrelay::build_app(orchestrator.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        destination,
        orchestrator,
        db_path,
    }
}

pub async fn cleanup_app(app: TestApp) {
    if let Ok(store) = app.orchestrator.store() {
        store.close().await;
    }
    remove_db_files(&app.db_path);
}
