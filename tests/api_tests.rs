mod common;

use reqwest::StatusCode;
use serde_json::json;

use formrelay::db;
use formrelay::models::{EntryStatus, EntryUpdate};

// ── Health ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_ok() {
    let app = common::spawn_app().await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");

    common::cleanup_app(app).await;
}

// ── Submissions ─────────────────────────────────────────────────

#[tokio::test]
async fn submit_delivers_immediately_when_destination_is_up() {
    let app = common::spawn_app().await;

    let (body, status) = app
        .submit(
            "companyA",
            &json!({
                "payload": {"email": "john@x.com", "phone": "555-1234", "name": "John"},
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "delivered");
    assert!(body["confirmation_code"].is_string());

    let record_id = body["record_id"].as_str().unwrap();
    let writes = app.destination.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].record_id, record_id);
    assert_eq!(writes[0].scope, "companyA");
    assert_eq!(writes[0].body["data"]["name"], "John");
    assert_eq!(writes[0].body["classification"], "anonymous");

    common::cleanup_app(app).await;
}

#[tokio::test]
async fn submit_queues_when_destination_is_down() {
    let app = common::spawn_app().await;
    app.destination.respond_with(StatusCode::SERVICE_UNAVAILABLE);

    let (body, status) = app
        .submit(
            "companyA",
            &json!({
                "payload": {"email": "john@x.com"},
                "classification": "authenticated",
                "actor_id": "user-42",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    assert_eq!(body["status"], "queued");
    assert!(body["entry_id"].is_string());

    let (stats, status) = app.get("/api/v1/queue/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["failed"], 0);

    let entry_id = body["entry_id"].as_str().unwrap();
    let (entry, status) = app.get(&format!("/api/v1/queue/{entry_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["status"], "pending");
    assert_eq!(entry["attempts"], 0);
    assert_eq!(entry["actorId"], "user-42");
    assert_eq!(entry["payload"], json!({"email": "john@x.com"}));

    common::cleanup_app(app).await;
}

#[tokio::test]
async fn queued_submission_is_delivered_by_drain() {
    let app = common::spawn_app().await;
    app.destination.respond_with(StatusCode::SERVICE_UNAVAILABLE);

    let (first, _) = app
        .submit("companyA", &json!({"payload": {"email": "john@x.com"}}))
        .await;
    assert_eq!(first["status"], "queued");

    app.destination.respond_with(StatusCode::OK);
    let (summary, status) = app.post("/api/v1/queue/drain").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary, json!({"processed": 1, "succeeded": 1, "failed": 0}));

    let writes = app.destination.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].record_id, first["record_id"].as_str().unwrap());

    let (stats, _) = app.get("/api/v1/queue/stats").await;
    assert_eq!(stats["pending"], 0);

    common::cleanup_app(app).await;
}

#[tokio::test]
async fn deferred_submission_skips_inline_delivery() {
    let app = common::spawn_app().await;

    let resp = app
        .client
        .post(app.url("/v1/submissions/companyA?defer=true"))
        .json(&json!({"payload": {"email": "a@b.c"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "queued");

    assert!(app.destination.writes().is_empty());
    let (stats, _) = app.get("/api/v1/queue/stats").await;
    assert_eq!(stats["pending"], 1);

    common::cleanup_app(app).await;
}

#[tokio::test]
async fn submit_rejected_by_destination_is_unprocessable() {
    let app = common::spawn_app().await;
    app.destination.respond_with(StatusCode::UNPROCESSABLE_ENTITY);

    let (body, status) = app
        .submit("companyA", &json!({"payload": {"email": "bad"}}))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("422"));

    let (stats, _) = app.get("/api/v1/queue/stats").await;
    assert_eq!(stats["pending"], 0);

    common::cleanup_app(app).await;
}

#[tokio::test]
async fn submit_validates_request() {
    let app = common::spawn_app().await;

    let (_, status) = app.submit("companyA", &json!({"payload": "not an object"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app
        .submit(
            "companyA",
            &json!({"payload": {}, "classification": "authenticated"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    common::cleanup_app(app).await;
}

#[tokio::test]
async fn anonymous_submission_without_identity_hides_record_id() {
    let app = common::spawn_app().await;

    let (body, status) = app
        .submit("companyA", &json!({"payload": {"comment": "hello"}}))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(body["record_id"].is_null());
    assert_eq!(app.destination.writes().len(), 1);

    common::cleanup_app(app).await;
}

// ── Operator queue endpoints ────────────────────────────────────

#[tokio::test]
async fn failed_entries_can_be_listed_and_requeued() {
    let app = common::spawn_app().await;
    app.destination.respond_with(StatusCode::SERVICE_UNAVAILABLE);

    let (body, _) = app
        .submit("companyA", &json!({"payload": {"email": "john@x.com"}}))
        .await;
    let entry_id: uuid::Uuid = body["entry_id"].as_str().unwrap().parse().unwrap();

    db::queue::update(
        app.store(),
        entry_id,
        EntryUpdate {
            status: Some(EntryStatus::Failed),
            attempts: Some(3),
            last_error: Some(Some("Max retries exceeded".to_string())),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let (list, status) = app.get("/api/v1/queue").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["status"], "failed");
    assert_eq!(list["total"], 1);
    assert_eq!(list["entries"][0]["lastError"], "Max retries exceeded");

    let (pending, _) = app.get("/api/v1/queue?status=pending").await;
    assert_eq!(pending["total"], 0);

    let (requeued, status) = app.post(&format!("/api/v1/queue/{entry_id}/requeue")).await;
    assert_eq!(status, StatusCode::OK);
    let new_id = requeued["entry_id"].as_str().unwrap();
    assert_ne!(new_id, entry_id.to_string());

    let (_, status) = app.post(&format!("/api/v1/queue/{new_id}/requeue")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (stats, _) = app.get("/api/v1/queue/stats").await;
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["failed"], 0);

    common::cleanup_app(app).await;
}

#[tokio::test]
async fn queue_entry_lookup_and_delete() {
    let app = common::spawn_app().await;
    app.destination.respond_with(StatusCode::SERVICE_UNAVAILABLE);

    let (body, _) = app
        .submit("companyA", &json!({"payload": {"email": "x@y.z"}}))
        .await;
    let entry_id = body["entry_id"].as_str().unwrap();

    assert_eq!(
        app.delete(&format!("/api/v1/queue/{entry_id}")).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        app.delete(&format!("/api/v1/queue/{entry_id}")).await,
        StatusCode::NO_CONTENT
    );

    let (body, status) = app.get(&format!("/api/v1/queue/{entry_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (_, status) = app
        .post(&format!("/api/v1/queue/{}/requeue", uuid::Uuid::now_v7()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    common::cleanup_app(app).await;
}
