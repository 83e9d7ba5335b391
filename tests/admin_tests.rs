//! Admin surface integration tests
//!
//! Exercises the event list, stats, manual retry, and operational endpoints
//! against a seeded in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use travelhook::admin::admin_router;
use travelhook::{
    AppState, BookingEvent, Config, EventProcessor, EventStatus, EventStore, HandlerRegistry,
    InMemoryEventStore,
};

fn test_app() -> (Router, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::new());
    let config = Config::test_config();
    let registry = Arc::new(HandlerRegistry::logging_defaults());
    let (processor, handle) = EventProcessor::new(registry, store.clone(), config.clone());
    tokio::spawn(async move {
        handle.run().await;
    });
    let state = Arc::new(AppState::new(store.clone(), Arc::new(processor), config));
    (admin_router(state), store)
}

fn sample_event(id: &str, event_type: &str) -> BookingEvent {
    BookingEvent {
        id: id.to_string(),
        event_type: event_type.to_string(),
        data: json!({ "booking_id": "bk_1" }),
        occurred_at: Utc::now(),
    }
}

async fn seed_failed(store: &InMemoryEventStore, id: &str, event_type: &str, error: &str) {
    store.upsert_received(&sample_event(id, event_type)).await.unwrap();
    store.claim(id).await.unwrap();
    store.mark_failed(id, error).await.unwrap();
}

async fn seed_processed(store: &InMemoryEventStore, id: &str, event_type: &str) {
    store.upsert_received(&sample_event(id, event_type)).await.unwrap();
    store.claim(id).await.unwrap();
    store.mark_processed(id).await.unwrap();
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_list_returns_events_pagination_and_stats() {
    let (app, store) = test_app();
    seed_processed(&store, "evt_1", "booking.confirmed").await;
    seed_failed(&store, "evt_2", "payment.captured", "smtp timeout").await;
    store
        .upsert_received(&sample_event("evt_3", "booking.cancelled"))
        .await
        .unwrap();

    let response = app.oneshot(get("/admin/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["events"].as_array().unwrap().len(), 3);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["hasMore"], false);
    assert_eq!(body["stats"]["total"], 3);
    assert_eq!(body["stats"]["processed"], 1);
    assert_eq!(body["stats"]["failed"], 1);
    assert_eq!(body["stats"]["received"], 1);
    assert_eq!(body["stats"]["byTypeLast24h"]["booking.confirmed"], 1);
}

#[tokio::test]
async fn test_list_filters_by_status_and_type() {
    let (app, store) = test_app();
    seed_processed(&store, "evt_1", "booking.confirmed").await;
    seed_failed(&store, "evt_2", "booking.confirmed", "boom").await;
    seed_failed(&store, "evt_3", "payment.captured", "boom").await;

    let response = app
        .clone()
        .oneshot(get("/admin/events?status=FAILED"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["pagination"]["total"], 2);
    for event in body["events"].as_array().unwrap() {
        assert_eq!(event["status"], "FAILED");
    }

    let response = app
        .oneshot(get("/admin/events?status=FAILED&event_type=payment.captured"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["events"][0]["id"], "evt_3");
}

#[tokio::test]
async fn test_list_rejects_unknown_status() {
    let (app, _store) = test_app();
    let response = app
        .oneshot(get("/admin/events?status=EXPLODED"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pagination_pages_are_disjoint() {
    let (app, store) = test_app();
    for i in 0..20 {
        store
            .upsert_received(&sample_event(&format!("evt_{i:02}"), "booking.confirmed"))
            .await
            .unwrap();
    }

    let first = json_body(
        app.clone()
            .oneshot(get("/admin/events?limit=10&offset=0"))
            .await
            .unwrap(),
    )
    .await;
    let second = json_body(
        app.oneshot(get("/admin/events?limit=10&offset=10"))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(first["pagination"]["hasMore"], true);
    assert_eq!(second["pagination"]["hasMore"], false);

    let ids = |page: &Value| -> Vec<String> {
        page["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap().to_string())
            .collect()
    };
    let first_ids = ids(&first);
    let second_ids = ids(&second);
    assert_eq!(first_ids.len(), 10);
    assert_eq!(second_ids.len(), 10);
    for id in &second_ids {
        assert!(!first_ids.contains(id), "page overlap on {id}");
    }
}

#[tokio::test]
async fn test_retry_failed_event_reprocesses_synchronously() {
    let (app, store) = test_app();
    seed_failed(&store, "evt_1", "booking.confirmed", "smtp timeout").await;

    let response = app
        .oneshot(post_json(
            "/admin/events",
            &json!({ "eventId": "evt_1", "action": "retry" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["eventId"], "evt_1");

    // The retry path is synchronous, so the row is terminal already
    let row = store.find("evt_1").await.unwrap().unwrap();
    assert_eq!(row.status, EventStatus::Processed);
    assert_eq!(row.retry_count, 1);
    assert_eq!(row.error_message, None);
}

#[tokio::test]
async fn test_retry_unsupported_type_reports_failure() {
    let (app, store) = test_app();
    seed_failed(&store, "evt_1", "loyalty.points_awarded", "no handler registered").await;

    let response = app
        .oneshot(post_json(
            "/admin/events",
            &json!({ "eventId": "evt_1", "action": "retry" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Unsupported event type"));

    let row = store.find("evt_1").await.unwrap().unwrap();
    assert_eq!(row.status, EventStatus::Failed);
    assert_eq!(row.retry_count, 1);
}

#[tokio::test]
async fn test_retry_missing_event_is_404() {
    let (app, _store) = test_app();
    let response = app
        .oneshot(post_json(
            "/admin/events",
            &json!({ "eventId": "evt_missing", "action": "retry" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_action_is_400() {
    let (app, store) = test_app();
    seed_failed(&store, "evt_1", "booking.confirmed", "boom").await;

    let response = app
        .oneshot(post_json(
            "/admin/events",
            &json!({ "eventId": "evt_1", "action": "replay" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_healthy() {
    let (app, _store) = test_app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_status_reports_service_info() {
    let (app, _store) = test_app();
    let response = app.oneshot(get("/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["name"], "travelhook");
    assert!(body["uptimeSeconds"].is_u64());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_metrics_exports_prometheus_text() {
    let (app, _store) = test_app();
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("travelhook_events_received_total"));
    assert!(text.contains("travelhook_retries_total"));
}
