//! travelhook - webhook ingestion and idempotent event processing
//!
//! Receives booking lifecycle webhooks from an external travel provider,
//! verifies their HMAC-SHA256 signatures, deduplicates them by provider
//! event id, and processes them asynchronously so the provider always gets
//! a fast acknowledgment. An admin surface exposes the event log, aggregate
//! stats, and manual retry for failed events.
//!
//! # Pipeline
//!
//! ```text
//! provider --> POST /webhooks/bookings
//!                |  rate limit -> signature -> validate -> upsert RECEIVED
//!                |  (fast 200 ack)
//!                v
//!          work channel --> claim -> handler -> PROCESSED | FAILED
//!                                                    ^
//!                       POST /admin/events (retry) --+
//! ```
//!
//! # Modules
//!
//! - [`signature`] - HMAC-SHA256 verification of raw delivery bytes
//! - [`ratelimit`] - per-source fixed-window rate limiting
//! - [`events`] - the delivery envelope and known lifecycle tags
//! - [`store`] - the idempotency store and its state machine
//! - [`processor`] - async dispatch, handler registry, staleness sweep
//! - [`ingest`] - the provider-facing ingestion endpoint
//! - [`admin`] - list/stats/retry plus health, status, and metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admin;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod processor;
pub mod ratelimit;
pub mod signature;
pub mod store;

pub use config::Config;
pub use error::{WebhookError, WebhookResult};
pub use events::{BookingEvent, BookingEventType};
pub use ingest::AppState;
pub use processor::{EventHandler, EventProcessor, HandlerRegistry, ProcessorHandle};
pub use store::{EventStatus, EventStore, InMemoryEventStore};

/// Service name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
