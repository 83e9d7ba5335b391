//! Admin query, retry, and health surface
//!
//! Operators triage failures here: a paginated recency-first event list with
//! status and type filters, aggregate stats that highlight emerging failure
//! clusters, and a manual retry action. Retry is synchronous - unlike
//! original ingestion the caller waits for the outcome - and deliberately
//! not idempotency-guarded: retrying an already-PROCESSED event is a
//! permitted operator escape hatch.
//!
//! Also hosts the operational endpoints: `/health` (persistence
//! connectivity), `/status` (uptime + counters), `/metrics` (Prometheus).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::{WebhookError, WebhookResult};
use crate::events::BookingEvent;
use crate::ingest::AppState;
use crate::metrics::global_metrics;
use crate::store::{EventFilter, EventStatus, StoreStats, WebhookEvent};

/// Default page size for the event list
const DEFAULT_LIMIT: usize = 50;

/// Upper bound on page size
const MAX_LIMIT: usize = 200;

/// Query parameters for the event list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    /// Filter to a single status (RECEIVED/PROCESSING/PROCESSED/FAILED)
    pub status: Option<String>,
    /// Filter to a single event type tag
    pub event_type: Option<String>,
    /// Page size
    pub limit: Option<usize>,
    /// Rows to skip
    pub offset: Option<usize>,
}

/// Pagination envelope for the list response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Total rows matching the filter
    pub total: usize,
    /// Requested page size
    pub limit: usize,
    /// Requested offset
    pub offset: usize,
    /// Whether rows remain past this page
    pub has_more: bool,
}

/// Response body for `GET /admin/events`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    /// Events in `received_at DESC` order
    pub events: Vec<WebhookEvent>,
    /// Pagination envelope
    pub pagination: Pagination,
    /// Store-wide aggregates
    pub stats: StoreStats,
}

/// Request body for `POST /admin/events`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequest {
    /// Provider event id to act on
    pub event_id: String,
    /// Action to perform; only "retry" is supported
    pub action: String,
}

/// Response body for `POST /admin/events`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    /// Whether the reprocessing attempt ended in PROCESSED
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// The event id acted on
    pub event_id: String,
}

/// Health probe body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy"
    pub status: String,
}

/// Status body: uptime plus a snapshot of the pipeline counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Service name
    pub name: String,
    /// Service version
    pub version: String,
    /// Seconds since startup
    pub uptime_seconds: u64,
    /// Deliveries accepted and persisted
    pub events_received: u64,
    /// Events that reached PROCESSED
    pub events_processed: u64,
    /// Events that reached FAILED
    pub events_failed: u64,
    /// Deliveries rejected by the rate limiter
    pub rate_limited: u64,
    /// Distinct source keys currently tracked by the limiter
    pub tracked_sources: usize,
    /// ISO-8601 timestamp of this snapshot
    pub timestamp: String,
}

/// Build the admin router
pub fn admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/events", get(list_events).post(retry_event))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /admin/events
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    match list_events_inner(&state, &params).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_events_inner(
    state: &AppState,
    params: &ListParams,
) -> WebhookResult<ListResponse> {
    let status = match params.status.as_deref() {
        Some(raw) => Some(
            EventStatus::parse(raw)
                .ok_or_else(|| WebhookError::Validation(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let filter = EventFilter {
        status,
        event_type: params.event_type.clone(),
        limit,
        offset,
    };

    let page = state.store.list(&filter).await?;
    let stats = state.store.stats().await?;

    Ok(ListResponse {
        pagination: Pagination {
            total: page.total,
            limit,
            offset,
            has_more: offset + page.events.len() < page.total,
        },
        events: page.events,
        stats,
    })
}

/// POST /admin/events
async fn retry_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RetryRequest>,
) -> Response {
    if request.action != "retry" {
        return WebhookError::Validation(format!("unknown action: {}", request.action))
            .into_response();
    }

    match retry_event_inner(&state, &request.event_id).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn retry_event_inner(state: &AppState, event_id: &str) -> WebhookResult<RetryResponse> {
    // begin_retry 404s on a missing row; on success the row is PROCESSING
    // with retry_count bumped and error_message cleared
    let row = state.store.begin_retry(event_id).await?;
    global_metrics().retries.fetch_add(1, Ordering::Relaxed);
    info!(
        event_id = %event_id,
        retry_count = row.retry_count,
        "Manual retry triggered"
    );

    let event = booking_event_from_row(&row);
    let final_status = state.processor.process_claimed(&event).await?;

    let success = final_status == EventStatus::Processed;
    let message = if success {
        "Event reprocessed successfully".to_string()
    } else {
        let detail = state
            .store
            .find(event_id)
            .await?
            .and_then(|r| r.error_message)
            .unwrap_or_else(|| "unknown error".to_string());
        warn!(event_id = %event_id, error = %detail, "Manual retry failed");
        format!("Event reprocessing failed: {detail}")
    };

    Ok(RetryResponse {
        success,
        message,
        event_id: event_id.to_string(),
    })
}

/// Rebuild the dispatchable event from a stored row. The provider-side
/// occurrence time is not persisted, so the first-receipt time stands in.
fn booking_event_from_row(row: &WebhookEvent) -> BookingEvent {
    BookingEvent {
        id: row.id.clone(),
        event_type: row.event_type.clone(),
        data: row.event_data.clone(),
        occurred_at: row.received_at,
    }
}

/// GET /health - reports persistence connectivity
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Health check failed: store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /status
async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    let metrics = global_metrics();
    let body = StatusResponse {
        name: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        events_received: metrics.events_received.load(Ordering::Relaxed),
        events_processed: metrics.events_processed.load(Ordering::Relaxed),
        events_failed: metrics.events_failed.load(Ordering::Relaxed),
        rate_limited: metrics.rate_limited.load(Ordering::Relaxed),
        tracked_sources: state.limiter.tracked_keys().await,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /metrics - Prometheus text format
async fn metrics_handler() -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        global_metrics().to_prometheus_format(),
    )
        .into_response()
}
