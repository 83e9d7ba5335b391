//! Webhook ingestion endpoint
//!
//! The synchronous path does only fast local work: rate-limit check,
//! signature verification over the raw body, envelope validation, the
//! idempotency read/write, and an enqueue. The handler invocation itself
//! runs off the response path, so the provider almost always sees a fast
//! 200 regardless of downstream health.
//!
//! Rejections (429/401/400) happen before any persistence - unauthenticated
//! traffic leaves no trace in the event store. Persistence failures on the
//! accept path are logged and swallowed: acknowledging the provider takes
//! priority over local audit completeness.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::WebhookError;
use crate::events::BookingEvent;
use crate::metrics::{global_metrics, AckTimer};
use crate::processor::EventProcessor;
use crate::ratelimit::{source_key, RateLimiter};
use crate::signature::{SignatureVerifier, SIGNATURE_HEADER};
use crate::store::{EventStatus, EventStore};

/// Shared state for the ingestion and admin surfaces
pub struct AppState {
    /// The idempotent event store
    pub store: Arc<dyn EventStore>,
    /// Signature verifier for inbound deliveries
    pub verifier: SignatureVerifier,
    /// Per-source rate limiter
    pub limiter: Arc<RateLimiter>,
    /// Queue into the async processor
    pub processor: Arc<EventProcessor>,
    /// Runtime configuration
    pub config: Config,
    /// Service start time, for the status surface
    pub start_time: Instant,
}

impl AppState {
    /// Assemble the shared state from its parts
    pub fn new(
        store: Arc<dyn EventStore>,
        processor: Arc<EventProcessor>,
        config: Config,
    ) -> Self {
        Self {
            verifier: SignatureVerifier::new(config.webhook_secret.clone()),
            limiter: Arc::new(RateLimiter::new(config.rate_limit_rpm)),
            store,
            processor,
            config,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("verifier", &self.verifier)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Acknowledgment body for accepted (or already-processed) deliveries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Always true on a 200
    pub received: bool,
    /// The provider event id
    pub event_id: String,
    /// Event type tag, present on fresh acceptance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Synchronous path duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    /// Set on the already-processed short-circuit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Build the provider-facing ingestion router
pub fn webhook_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/bookings", post(ingest_handler))
        .with_state(state)
}

/// POST /webhooks/bookings
///
/// Orchestrates the synchronous ingestion path; see the module docs for the
/// ordering contract. Never blocks on business logic.
pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let timer = AckTimer::start();
    let metrics = global_metrics();

    // 1-2. Rate limit by source key, before any other work
    let key = source_key(&headers);
    let decision = state.limiter.check(&key).await;
    if !decision.allowed {
        metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
        warn!(source = %key, "Delivery rejected: rate limit exceeded");
        return WebhookError::RateLimited {
            retry_after_secs: decision.retry_after.as_secs(),
        }
        .into_response();
    }

    // 3. Authenticate the exact raw bytes before parsing anything
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !state.verifier.verify(&body, signature) {
        metrics.signature_rejections.fetch_add(1, Ordering::Relaxed);
        warn!(source = %key, "Delivery rejected: invalid signature");
        return WebhookError::Authentication.into_response();
    }

    // 4. Validate the envelope
    let event = match BookingEvent::from_bytes(&body) {
        Ok(e) => e,
        Err(e) => {
            metrics.validation_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(source = %key, error = %e, "Delivery rejected: malformed envelope");
            return e.into_response();
        }
    };

    // 5. Idempotency pre-check: completed events are acknowledged without
    //    any further work or duplicate side effects
    match state.store.find(&event.id).await {
        Ok(Some(row)) if row.status == EventStatus::Processed => {
            metrics.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(event_id = %event.id, "Duplicate delivery of processed event");
            let elapsed = timer.finish(metrics);
            return Json(IngestResponse {
                received: true,
                event_id: event.id,
                event_type: None,
                processing_time_ms: Some(elapsed.as_millis() as u64),
                message: Some("Event already processed".to_string()),
            })
            .into_response();
        }
        Ok(_) => {}
        Err(e) => {
            // Ack priority: a failed pre-check read must not reject the
            // delivery; the upsert below gets its own chance
            error!(event_id = %event.id, error = %e, "Idempotency pre-check failed");
        }
    }

    // 6-7. Persist RECEIVED and enqueue; both failures are swallowed so the
    //      provider still gets its acknowledgment (it will redeliver)
    match state.store.upsert_received(&event).await {
        Ok(_) => {
            metrics.events_received.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = state.processor.queue_event(event.clone()).await {
                error!(event_id = %event.id, error = %e, "Failed to enqueue event");
            }
        }
        Err(e) => {
            error!(event_id = %event.id, error = %e, "Failed to persist event");
        }
    }

    // 8. Fast acknowledgment
    let elapsed = timer.finish(metrics);
    Json(IngestResponse {
        received: true,
        event_id: event.id,
        event_type: Some(event.event_type),
        processing_time_ms: Some(elapsed.as_millis() as u64),
        message: None,
    })
    .into_response()
}
