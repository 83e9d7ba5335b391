//! Async event processing
//!
//! The ingestion endpoint acknowledges the provider quickly and hands the
//! event to this module over an internal work channel. A background loop
//! spawns one task per event; each task claims the row, resolves a handler
//! from the registry, invokes it under a deadline, and records the terminal
//! status. Failures are isolated per event and surface only through the
//! store and the admin surface - nothing here retries automatically.
//!
//! # Architecture
//!
//! ```text
//! Webhook Received
//!       |
//!       v
//! [Verify Signature]
//!       |
//!       v
//! [Check Idempotency] --> Already processed? --> Return 200
//!       |
//!       v
//! [Upsert RECEIVED + Enqueue] --> Return 200 immediately
//!       |
//!       v
//! [Claim -> Handler under deadline]
//!       |
//!       v
//! [PROCESSED or FAILED in the store]
//! ```

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::{WebhookError, WebhookResult};
use crate::events::{BookingEvent, BookingEventType};
use crate::metrics::global_metrics;
use crate::store::{EventStatus, EventStore};

/// Handler for one event type's business logic.
///
/// Implementations live outside this pipeline (confirmation emails, booking
/// and commission mutations); the pipeline only cares that they return a
/// result it can record.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Process the event's payload. An `Err` is captured as FAILED state.
    async fn handle(&self, event: &BookingEvent) -> anyhow::Result<()>;
}

/// Dispatch table mapping event-type tags to handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event-type tag, replacing any previous one
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Resolve the handler for a tag
    pub fn resolve(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    /// Registered event-type tags
    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Registry with [`LoggingHandler`] wired for every known lifecycle tag
    pub fn logging_defaults() -> Self {
        let handler: Arc<dyn EventHandler> = Arc::new(LoggingHandler);
        let mut registry = Self::new();
        for event_type in [
            BookingEventType::BookingConfirmed,
            BookingEventType::BookingCancelled,
            BookingEventType::PaymentCaptured,
            BookingEventType::PaymentFailed,
            BookingEventType::RefundIssued,
        ] {
            registry.register(event_type.as_str(), handler.clone());
        }
        registry
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered_types", &self.registered_types())
            .finish()
    }
}

/// A processing task sent to the background loop
struct ProcessingTask {
    event: BookingEvent,
}

/// Queues events for background processing and runs the retry path
pub struct EventProcessor {
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn EventStore>,
    config: Config,
    task_sender: mpsc::Sender<ProcessingTask>,
}

impl EventProcessor {
    /// Create a processor and the handle that drives its background loop
    pub fn new(
        registry: Arc<HandlerRegistry>,
        store: Arc<dyn EventStore>,
        config: Config,
    ) -> (Self, ProcessorHandle) {
        let (tx, rx) = mpsc::channel(1000);

        let processor = Self {
            registry: registry.clone(),
            store: store.clone(),
            config: config.clone(),
            task_sender: tx,
        };

        let handle = ProcessorHandle {
            registry,
            store,
            config,
            task_receiver: rx,
        };

        (processor, handle)
    }

    /// Queue an event for async processing.
    ///
    /// Returns immediately after enqueueing; the HTTP response path never
    /// waits for the handler.
    pub async fn queue_event(&self, event: BookingEvent) -> WebhookResult<()> {
        self.task_sender
            .send(ProcessingTask { event })
            .await
            .map_err(|e| WebhookError::Internal(format!("failed to queue event: {e}")))
    }

    /// Process an event whose row is already in PROCESSING (the admin retry
    /// path). The caller waits for the outcome, unlike original ingestion.
    pub async fn process_claimed(&self, event: &BookingEvent) -> WebhookResult<EventStatus> {
        process_claimed_event(&self.registry, &self.store, event, &self.config).await
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Handle for running the background processing loop
pub struct ProcessorHandle {
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn EventStore>,
    config: Config,
    task_receiver: mpsc::Receiver<ProcessingTask>,
}

impl ProcessorHandle {
    /// Run the background loop. Spawn as a tokio task:
    ///
    /// ```rust,ignore
    /// tokio::spawn(async move {
    ///     handle.run().await;
    /// });
    /// ```
    pub async fn run(mut self) {
        tracing::info!("Starting webhook event processor");

        while let Some(task) = self.task_receiver.recv().await {
            let registry = self.registry.clone();
            let store = self.store.clone();
            let config = self.config.clone();

            // One detached task per event; failures stay isolated
            tokio::spawn(async move {
                dispatch_event(registry, store, task.event, config).await;
            });
        }

        tracing::info!("Webhook event processor shutting down");
    }
}

/// Claim the row and run the handler. Losing the claim means another worker
/// already owns this id, or the event completed while queued - skip quietly.
async fn dispatch_event(
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn EventStore>,
    event: BookingEvent,
    config: Config,
) {
    match store.claim(&event.id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(event_id = %event.id, "Skipping dispatch: claim not won");
            return;
        }
        Err(e) => {
            tracing::error!(event_id = %event.id, error = %e, "Failed to claim event");
            return;
        }
    }

    if let Err(e) = process_claimed_event(&registry, &store, &event, &config).await {
        tracing::error!(
            event_id = %event.id,
            error = %e,
            "Failed to record processing outcome"
        );
    }
}

/// Resolve and invoke the handler for a claimed event, then record the
/// terminal status. Returns the status that was recorded.
async fn process_claimed_event(
    registry: &Arc<HandlerRegistry>,
    store: &Arc<dyn EventStore>,
    event: &BookingEvent,
    config: &Config,
) -> WebhookResult<EventStatus> {
    let metrics = global_metrics();

    let handler = match registry.resolve(&event.event_type) {
        Some(h) => h,
        None => {
            let err = WebhookError::UnsupportedEventType(event.event_type.clone());
            tracing::warn!(event_id = %event.id, event_type = %event.event_type, "{err}");
            store.mark_failed(&event.id, &err.to_string()).await?;
            metrics.events_failed.fetch_add(1, Ordering::Relaxed);
            return Ok(EventStatus::Failed);
        }
    };

    let outcome = timeout(config.processing_timeout, handler.handle(event)).await;

    match outcome {
        Ok(Ok(())) => {
            store.mark_processed(&event.id).await?;
            metrics.events_processed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Event processed successfully"
            );
            Ok(EventStatus::Processed)
        }
        Ok(Err(e)) => {
            let err = WebhookError::Handler(e.to_string());
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %err,
                "Event processing failed"
            );
            store.mark_failed(&event.id, &err.to_string()).await?;
            metrics.events_failed.fetch_add(1, Ordering::Relaxed);
            Ok(EventStatus::Failed)
        }
        Err(_) => {
            let err = WebhookError::Handler(format!(
                "processing timed out after {:?}",
                config.processing_timeout
            ));
            tracing::warn!(event_id = %event.id, "{err}");
            store.mark_failed(&event.id, &err.to_string()).await?;
            metrics.events_failed.fetch_add(1, Ordering::Relaxed);
            Ok(EventStatus::Failed)
        }
    }
}

/// Spawn the staleness sweep: every `interval`, PROCESSING rows older than
/// `stale_after` are flagged FAILED so operators can see and retry them.
pub fn spawn_stale_sweeper(
    store: Arc<dyn EventStore>,
    interval: Duration,
    stale_after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.sweep_stale(stale_after).await {
                Ok(0) => {}
                Ok(swept) => {
                    tracing::warn!(swept, "Flagged stalled PROCESSING events as FAILED");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Staleness sweep failed");
                }
            }
        }
    })
}

/// No-op handler for testing
#[derive(Clone)]
pub struct NoOpHandler;

#[async_trait::async_trait]
impl EventHandler for NoOpHandler {
    async fn handle(&self, _event: &BookingEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logging handler used as the registry default until real business
/// handlers are wired in
#[derive(Clone)]
pub struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &BookingEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            occurred_at = %event.occurred_at,
            "Handling booking lifecycle event"
        );
        Ok(())
    }
}
