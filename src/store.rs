//! Idempotent webhook event store
//!
//! The sole persisted entity of the pipeline: one row per provider event id,
//! upserted on conflict so duplicate deliveries never create a second row.
//! The status machine is RECEIVED -> PROCESSING -> PROCESSED | FAILED, with
//! manual retry looping a terminal row back through PROCESSING.
//!
//! [`EventStore`] is the capability boundary; [`InMemoryEventStore`] is the
//! default single-instance implementation. A durable backend needs atomic
//! upsert-on-conflict and time-window aggregate queries, nothing more.
//!
//! Row invariants:
//!
//! - `received_at` is write-once; upserts preserve the original value.
//! - `retry_count` changes only through [`EventStore::begin_retry`].
//! - Rows are never deleted here; retention is an external concern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{WebhookError, WebhookResult};
use crate::events::BookingEvent;

/// Lifecycle status of a stored webhook event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    /// Accepted and persisted, dispatch pending
    Received,
    /// A worker holds the claim and is executing the handler
    Processing,
    /// Handler completed successfully
    Processed,
    /// Handler failed; `error_message` holds the captured cause
    Failed,
}

impl EventStatus {
    /// Get the string representation used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a wire/query-string value (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RECEIVED" => Some(Self::Received),
            "PROCESSING" => Some(Self::Processing),
            "PROCESSED" => Some(Self::Processed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A persisted webhook event row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Provider-assigned event id; primary key and idempotency token
    pub id: String,
    /// Event type tag, immutable
    pub event_type: String,
    /// Payload stored verbatim, immutable
    pub event_data: serde_json::Value,
    /// Current lifecycle status
    pub status: EventStatus,
    /// Captured failure cause; cleared on retry
    pub error_message: Option<String>,
    /// Number of explicit retries performed
    pub retry_count: u32,
    /// First-insert timestamp, write-once
    pub received_at: DateTime<Utc>,
    /// Set when entering PROCESSED or FAILED
    pub processed_at: Option<DateTime<Utc>>,
    /// Last status transition; drives the staleness sweep
    pub updated_at: DateTime<Utc>,
}

/// Filters and pagination for the admin list surface
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to a single status
    pub status: Option<EventStatus>,
    /// Restrict to a single event type tag
    pub event_type: Option<String>,
    /// Page size
    pub limit: usize,
    /// Rows to skip
    pub offset: usize,
}

/// One page of events plus the unpaginated total
#[derive(Debug, Clone)]
pub struct EventPage {
    /// Rows in `received_at DESC` order
    pub events: Vec<WebhookEvent>,
    /// Total rows matching the filter, ignoring pagination
    pub total: usize,
}

/// Aggregate counts per status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    /// All rows
    pub total: u64,
    /// Rows in PROCESSED
    pub processed: u64,
    /// Rows in FAILED
    pub failed: u64,
    /// Rows in PROCESSING
    pub processing: u64,
    /// Rows in RECEIVED
    pub received: u64,
}

/// Store-wide aggregates for the admin stats surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Per-status counts over the whole store
    #[serde(flatten)]
    pub counts: StatusCounts,
    /// Per-event-type counts over the trailing 24 hours
    pub by_type_last24h: HashMap<String, u64>,
}

/// Capability boundary over the persistence engine
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Insert a RECEIVED row for the event, or update the existing row in
    /// place preserving the original `received_at`. An existing PROCESSED or
    /// PROCESSING row is returned unchanged: a duplicate delivery must
    /// neither resurrect a completed event nor reset a row whose claim a
    /// worker currently holds.
    async fn upsert_received(&self, event: &BookingEvent) -> WebhookResult<WebhookEvent>;

    /// Look up a row by provider event id
    async fn find(&self, id: &str) -> WebhookResult<Option<WebhookEvent>>;

    /// Atomically claim a row for dispatch: RECEIVED or FAILED transitions
    /// to PROCESSING and returns `true`; any other state (or a missing row)
    /// returns `false`. At most one caller wins a given claim, which is what
    /// guarantees at-most-one concurrent handler execution per id.
    async fn claim(&self, id: &str) -> WebhookResult<bool>;

    /// Record a successful handler outcome
    async fn mark_processed(&self, id: &str) -> WebhookResult<()>;

    /// Record a failed handler outcome with the captured message
    async fn mark_failed(&self, id: &str, error: &str) -> WebhookResult<()>;

    /// Begin a manual retry: status to PROCESSING, `retry_count += 1`,
    /// `error_message` cleared. Errors with [`WebhookError::NotFound`] when
    /// the row does not exist. Deliberately not guarded against PROCESSED
    /// rows; the operator escape hatch is logged instead.
    async fn begin_retry(&self, id: &str) -> WebhookResult<WebhookEvent>;

    /// List rows matching the filter in `received_at DESC` order
    async fn list(&self, filter: &EventFilter) -> WebhookResult<EventPage>;

    /// Aggregate counts for the stats surface
    async fn stats(&self) -> WebhookResult<StoreStats>;

    /// Mark PROCESSING rows older than `older_than` as FAILED so operators
    /// can see and retry them. Returns the number of rows swept.
    async fn sweep_stale(&self, older_than: Duration) -> WebhookResult<u64>;

    /// Persistence connectivity probe for the health endpoint
    async fn ping(&self) -> WebhookResult<()>;
}

/// In-memory event store for single-instance deployments and tests
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    rows: Arc<RwLock<HashMap<String, WebhookEvent>>>,
}

impl InMemoryEventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store holds no rows
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn upsert_received(&self, event: &BookingEvent) -> WebhookResult<WebhookEvent> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();

        let row = match rows.get_mut(&event.id) {
            Some(existing) => {
                // Only RECEIVED and FAILED rows are touched: a PROCESSED row
                // must not be resurrected, and a PROCESSING row must not be
                // reset while a worker holds the claim - that would let a
                // duplicate delivery win a second concurrent claim
                if matches!(
                    existing.status,
                    EventStatus::Received | EventStatus::Failed
                ) {
                    existing.status = EventStatus::Received;
                    existing.updated_at = now;
                }
                existing.clone()
            }
            None => {
                let row = WebhookEvent {
                    id: event.id.clone(),
                    event_type: event.event_type.clone(),
                    event_data: event.data.clone(),
                    status: EventStatus::Received,
                    error_message: None,
                    retry_count: 0,
                    received_at: now,
                    processed_at: None,
                    updated_at: now,
                };
                rows.insert(event.id.clone(), row.clone());
                row
            }
        };

        Ok(row)
    }

    async fn find(&self, id: &str) -> WebhookResult<Option<WebhookEvent>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn claim(&self, id: &str) -> WebhookResult<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(id) {
            Some(row)
                if matches!(row.status, EventStatus::Received | EventStatus::Failed) =>
            {
                row.status = EventStatus::Processing;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_processed(&self, id: &str) -> WebhookResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| WebhookError::NotFound(id.to_string()))?;

        let now = Utc::now();
        row.status = EventStatus::Processed;
        row.error_message = None;
        row.processed_at = Some(now);
        row.updated_at = now;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> WebhookResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| WebhookError::NotFound(id.to_string()))?;

        let now = Utc::now();
        row.status = EventStatus::Failed;
        row.error_message = Some(error.to_string());
        row.processed_at = Some(now);
        row.updated_at = now;
        Ok(())
    }

    async fn begin_retry(&self, id: &str) -> WebhookResult<WebhookEvent> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| WebhookError::NotFound(id.to_string()))?;

        if row.status == EventStatus::Processed {
            warn!(event_id = %id, "Retrying an already-PROCESSED event");
        }

        row.status = EventStatus::Processing;
        row.retry_count += 1;
        row.error_message = None;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn list(&self, filter: &EventFilter) -> WebhookResult<EventPage> {
        let rows = self.rows.read().await;

        let mut matching: Vec<WebhookEvent> = rows
            .values()
            .filter(|row| filter.status.map(|s| row.status == s).unwrap_or(true))
            .filter(|row| {
                filter
                    .event_type
                    .as_deref()
                    .map(|t| row.event_type == t)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        // Recency-first; id as tie-break so pagination slices stay stable
        matching.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total = matching.len();
        let events = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect();

        Ok(EventPage { events, total })
    }

    async fn stats(&self) -> WebhookResult<StoreStats> {
        let rows = self.rows.read().await;
        let cutoff = Utc::now() - chrono::Duration::hours(24);

        let mut stats = StoreStats::default();
        for row in rows.values() {
            stats.counts.total += 1;
            match row.status {
                EventStatus::Received => stats.counts.received += 1,
                EventStatus::Processing => stats.counts.processing += 1,
                EventStatus::Processed => stats.counts.processed += 1,
                EventStatus::Failed => stats.counts.failed += 1,
            }

            if row.received_at >= cutoff {
                *stats
                    .by_type_last24h
                    .entry(row.event_type.clone())
                    .or_insert(0) += 1;
            }
        }

        Ok(stats)
    }

    async fn sweep_stale(&self, older_than: Duration) -> WebhookResult<u64> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(older_than)
                .map_err(|e| WebhookError::Internal(e.to_string()))?;

        let mut swept = 0;
        for row in rows.values_mut() {
            if row.status == EventStatus::Processing && row.updated_at < cutoff {
                row.status = EventStatus::Failed;
                row.error_message = Some("processing stalled".to_string());
                row.processed_at = Some(now);
                row.updated_at = now;
                swept += 1;
            }
        }

        Ok(swept)
    }

    async fn ping(&self) -> WebhookResult<()> {
        // The in-memory map is always reachable
        Ok(())
    }
}
