//! Ingestion endpoint integration tests
//!
//! Drives the provider-facing router with real HTTP requests and checks the
//! acknowledgment contract, the rejection paths, and the eventual stored
//! state behind each of them.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use travelhook::ingest::webhook_router;
use travelhook::signature::{SignatureVerifier, SIGNATURE_HEADER};
use travelhook::{AppState, Config, EventProcessor, EventStatus, EventStore, HandlerRegistry, InMemoryEventStore};

const TEST_SECRET: &str = "test-signing-secret-for-unit-tests";

/// Build the app state with a live background processor
fn test_state(config: Config) -> (Arc<AppState>, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::new());
    let registry = Arc::new(HandlerRegistry::logging_defaults());
    let (processor, handle) = EventProcessor::new(registry, store.clone(), config.clone());
    tokio::spawn(async move {
        handle.run().await;
    });
    let state = Arc::new(AppState::new(store.clone(), Arc::new(processor), config));
    (state, store)
}

fn envelope(id: &str, event_type: &str) -> Value {
    json!({
        "id": id,
        "type": event_type,
        "data": { "booking_id": "bk_42", "amount": 129.99 },
        "occurred_at": "2024-06-01T12:00:00Z"
    })
}

fn signed_request(body: &Value) -> Request<Body> {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = SignatureVerifier::sign(TEST_SECRET, &raw);
    Request::builder()
        .method("POST")
        .uri("/webhooks/bookings")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Wait for the background processor to settle an event into a terminal
/// status, bounded so a broken pipeline fails the test instead of hanging
async fn wait_for_terminal(store: &InMemoryEventStore, id: &str) -> EventStatus {
    for _ in 0..50 {
        if let Some(row) = store.find(id).await.unwrap() {
            if matches!(row.status, EventStatus::Processed | EventStatus::Failed) {
                return row.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event {id} never reached a terminal status");
}

#[tokio::test]
async fn test_valid_delivery_acked_and_processed() {
    let (state, store) = test_state(Config::test_config());
    let app = webhook_router(state);

    let response = app
        .oneshot(signed_request(&envelope("evt_1", "booking.confirmed")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["eventId"], "evt_1");
    assert_eq!(body["eventType"], "booking.confirmed");
    assert!(body["processingTimeMs"].is_u64());

    assert_eq!(wait_for_terminal(&store, "evt_1").await, EventStatus::Processed);
    let row = store.find("evt_1").await.unwrap().unwrap();
    assert!(row.processed_at.is_some());
    assert_eq!(row.error_message, None);
}

#[tokio::test]
async fn test_duplicate_of_processed_event_short_circuits() {
    let (state, store) = test_state(Config::test_config());
    let app = webhook_router(state);

    let event = envelope("evt_1", "booking.confirmed");
    let response = app.clone().oneshot(signed_request(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_terminal(&store, "evt_1").await;

    // Redelivery of a completed event: acked, but no second row and no
    // second processing pass
    let response = app.oneshot(signed_request(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["message"], "Event already processed");

    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_tampered_signature_rejected_without_persistence() {
    let (state, store) = test_state(Config::test_config());
    let app = webhook_router(state);

    let raw = serde_json::to_vec(&envelope("evt_1", "booking.confirmed")).unwrap();
    let signature = SignatureVerifier::sign("not-the-shared-secret", &raw);
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/bookings")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid signature");

    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let (state, store) = test_state(Config::test_config());
    let app = webhook_router(state);

    let raw = serde_json::to_vec(&envelope("evt_1", "booking.confirmed")).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/bookings")
        .header("content-type", "application/json")
        .body(Body::from(raw))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_malformed_envelope_rejected() {
    let (state, store) = test_state(Config::test_config());
    let app = webhook_router(state);

    // Valid signature over an envelope missing `occurred_at`
    let body = json!({
        "id": "evt_1",
        "type": "booking.confirmed",
        "data": {}
    });
    let response = app.oneshot(signed_request(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_rate_limit_rejects_over_budget_requests() {
    let config = Config {
        rate_limit_rpm: 2,
        ..Config::test_config()
    };
    let (state, _store) = test_state(config);
    let app = webhook_router(state);

    for i in 1..=2 {
        let response = app
            .clone()
            .oneshot(signed_request(&envelope(&format!("evt_{i}"), "booking.confirmed")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i} within budget");
    }

    let response = app
        .oneshot(signed_request(&envelope("evt_3", "booking.confirmed")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get("X-RateLimit-Remaining").unwrap(),
        "0"
    );
    assert!(response.headers().get("Retry-After").is_some());
}

#[tokio::test]
async fn test_rate_limit_keys_sources_independently() {
    let config = Config {
        rate_limit_rpm: 1,
        ..Config::test_config()
    };
    let (state, _store) = test_state(config);
    let app = webhook_router(state);

    let from = |ip: &str, id: &str| {
        let raw = serde_json::to_vec(&envelope(id, "booking.confirmed")).unwrap();
        let signature = SignatureVerifier::sign(TEST_SECRET, &raw);
        Request::builder()
            .method("POST")
            .uri("/webhooks/bookings")
            .header("content-type", "application/json")
            .header("x-forwarded-for", ip)
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(raw))
            .unwrap()
    };

    let response = app.clone().oneshot(from("203.0.113.9", "evt_1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(from("203.0.113.9", "evt_2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different source still has budget
    let response = app.oneshot(from("198.51.100.7", "evt_3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unsupported_type_is_acked_then_failed() {
    let (state, store) = test_state(Config::test_config());
    let app = webhook_router(state);

    let response = app
        .oneshot(signed_request(&envelope("evt_1", "loyalty.points_awarded")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(wait_for_terminal(&store, "evt_1").await, EventStatus::Failed);
    let row = store.find("evt_1").await.unwrap().unwrap();
    assert!(row
        .error_message
        .as_deref()
        .unwrap()
        .contains("Unsupported event type"));
}

#[tokio::test]
async fn test_redelivery_of_failed_event_reprocesses() {
    let (state, store) = test_state(Config::test_config());
    let app = webhook_router(state);

    // First delivery fails for lack of a handler
    let event = envelope("evt_1", "loyalty.points_awarded");
    app.clone().oneshot(signed_request(&event)).await.unwrap();
    assert_eq!(wait_for_terminal(&store, "evt_1").await, EventStatus::Failed);

    // Redelivery claims the FAILED row and runs again; still one row
    app.oneshot(signed_request(&event)).await.unwrap();
    assert_eq!(wait_for_terminal(&store, "evt_1").await, EventStatus::Failed);
    assert_eq!(store.len().await, 1);
}
