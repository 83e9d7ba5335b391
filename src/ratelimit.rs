//! Per-source fixed-window rate limiting
//!
//! Bounds inbound request volume per source key within a 60 second window.
//! The key is derived from forwarding headers (`x-forwarded-for`, then
//! `x-real-ip`, falling back to the literal `"unknown"`), so a proxy fleet
//! that strips those headers collapses into one shared bucket.
//!
//! State is an in-process map guarded by an async RwLock; it resets on
//! restart and on window expiry. This only bounds load per instance - a
//! multi-instance deployment needs a shared counter service to preserve the
//! global bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use tokio::sync::RwLock;

/// Fixed rate-limit window length
const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window rate limiter keyed by source identifier
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum requests per window
    max_requests: u32,
    /// Window duration
    window: Duration,
    /// Request counts per source key
    buckets: Arc<RwLock<HashMap<String, RateBucket>>>,
}

#[derive(Debug, Clone)]
struct RateBucket {
    /// Number of requests in the current window
    count: u32,
    /// Window start time
    window_start: Instant,
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Remaining requests in the current window (0 when rejected)
    pub remaining: u32,
    /// Time until the window resets
    pub retry_after: Duration,
}

impl RateLimiter {
    /// Create a new limiter allowing `requests_per_minute` per key
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            max_requests: requests_per_minute,
            window: WINDOW,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check whether a request from `key` is allowed and count it.
    ///
    /// The first request in a window initializes the bucket; subsequent
    /// requests increment it. Once the count exceeds the ceiling the request
    /// is rejected until the window resets.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();

        let bucket = buckets.entry(key.to_string()).or_insert(RateBucket {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        bucket.count += 1;
        let retry_after = self
            .window
            .saturating_sub(now.duration_since(bucket.window_start));

        if bucket.count > self.max_requests {
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            }
        } else {
            RateLimitDecision {
                allowed: true,
                remaining: self.max_requests - bucket.count,
                retry_after,
            }
        }
    }

    /// Evict buckets whose window expired long ago (call periodically)
    pub async fn cleanup(&self) {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        let window = self.window;

        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < window * 2);
    }

    /// Number of tracked source keys (for the status surface)
    pub async fn tracked_keys(&self) -> usize {
        self.buckets.read().await.len()
    }
}

/// Derive the rate-limit source key from forwarding headers.
///
/// `x-forwarded-for` may hold a comma-separated chain; the first entry is
/// the originating client.
pub fn source_key(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    "unknown".to_string()
}
