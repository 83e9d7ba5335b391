//! travelhook server binary
//!
//! Wires the ingestion endpoint, the async processor, and the admin surface
//! onto one listener, then serves until killed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;

use travelhook::ingest::webhook_router;
use travelhook::processor::spawn_stale_sweeper;
use travelhook::{admin, AppState, Config, EventProcessor, HandlerRegistry, InMemoryEventStore};

/// Interval between rate-limiter bucket sweeps
const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(name = "travelhookd")]
#[command(about = "Webhook ingestion and idempotent event processing service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "TRAVELHOOK_PORT")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "TRAVELHOOK_HOST")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("travelhook={default_level},tower_http=info").into()),
        )
        .init();

    info!(version = travelhook::VERSION, "Starting travelhook");

    let config = Config::from_env().context("failed to load configuration")?;
    let store = Arc::new(InMemoryEventStore::new());

    let registry = Arc::new(HandlerRegistry::logging_defaults());
    let (processor, handle) = EventProcessor::new(registry, store.clone(), config.clone());
    tokio::spawn(async move {
        handle.run().await;
    });

    spawn_stale_sweeper(store.clone(), config.sweep_interval, config.stale_after);

    let state = Arc::new(AppState::new(store, Arc::new(processor), config));

    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            limiter.cleanup().await;
        }
    });

    let app = Router::new()
        .merge(webhook_router(state.clone()))
        .merge(admin::admin_router(state))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Listening for webhook deliveries");

    axum::serve(listener, app)
        .await
        .context("server terminated unexpectedly")?;

    Ok(())
}
