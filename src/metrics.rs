//! Metrics collection for the ingestion pipeline
//!
//! Thread-safe counters and a memory-efficient duration histogram for the
//! webhook surface, with Prometheus text export served at `/metrics`.
//!
//! Rejected deliveries (bad signature, rate limited) are counted here even
//! though they are never persisted - this is the only security telemetry the
//! pipeline keeps for unauthenticated traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Maximum number of duration samples kept in the histogram
const MAX_HISTOGRAM_SAMPLES: usize = 1000;

/// Metrics for the webhook ingestion pipeline
#[derive(Debug)]
pub struct IngestMetrics {
    // === Counters ===
    /// Deliveries accepted and persisted
    pub events_received: AtomicU64,
    /// Deliveries short-circuited as already processed
    pub duplicates: AtomicU64,
    /// Deliveries rejected for a bad or missing signature
    pub signature_rejections: AtomicU64,
    /// Deliveries rejected by the rate limiter
    pub rate_limited: AtomicU64,
    /// Deliveries rejected as malformed envelopes
    pub validation_rejections: AtomicU64,
    /// Events that reached PROCESSED
    pub events_processed: AtomicU64,
    /// Events that reached FAILED
    pub events_failed: AtomicU64,
    /// Manual retries triggered through the admin surface
    pub retries: AtomicU64,

    // === Histogram ===
    /// Synchronous ingestion path durations (ack latency, not handler time)
    ack_durations: RwLock<RingBuffer>,
}

/// Ring buffer for histogram samples; overwrites the oldest when full
#[derive(Debug)]
struct RingBuffer {
    data: Vec<Duration>,
    capacity: usize,
    write_pos: usize,
    total_samples: u64,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
            total_samples: 0,
        }
    }

    fn push(&mut self, value: Duration) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.write_pos] = value;
        }
        self.write_pos = (self.write_pos + 1) % self.capacity;
        self.total_samples += 1;
    }

    fn percentile(&self, p: f64) -> Option<Duration> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).copied()
    }
}

impl IngestMetrics {
    /// Create a fresh metrics instance
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            signature_rejections: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            ack_durations: RwLock::new(RingBuffer::new(MAX_HISTOGRAM_SAMPLES)),
        }
    }

    /// Record the synchronous ingestion path duration
    pub fn record_ack_duration(&self, duration: Duration) {
        self.ack_durations.write().push(duration);
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters = [
            ("travelhook_events_received_total", &self.events_received),
            ("travelhook_duplicates_total", &self.duplicates),
            (
                "travelhook_signature_rejections_total",
                &self.signature_rejections,
            ),
            ("travelhook_rate_limited_total", &self.rate_limited),
            (
                "travelhook_validation_rejections_total",
                &self.validation_rejections,
            ),
            ("travelhook_events_processed_total", &self.events_processed),
            ("travelhook_events_failed_total", &self.events_failed),
            ("travelhook_retries_total", &self.retries),
        ];
        for (name, counter) in counters {
            output.push_str(&format!("{name} {}\n", counter.load(Ordering::Relaxed)));
        }

        let durations = self.ack_durations.read();
        for (label, p) in [("p50", 0.5), ("p95", 0.95), ("p99", 0.99)] {
            if let Some(value) = durations.percentile(p) {
                output.push_str(&format!(
                    "travelhook_ack_duration_{label}_ms {}\n",
                    value.as_millis()
                ));
            }
        }

        output
    }

    /// Total ack samples recorded (including overwritten ones)
    pub fn ack_samples(&self) -> u64 {
        self.ack_durations.read().total_samples
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance for the service
pub static METRICS: OnceLock<IngestMetrics> = OnceLock::new();

/// Get or initialize the global metrics instance
pub fn global_metrics() -> &'static IngestMetrics {
    METRICS.get_or_init(IngestMetrics::new)
}

/// Timer helper that records into the ack histogram on completion
#[derive(Debug)]
pub struct AckTimer {
    start: Instant,
}

impl AckTimer {
    /// Start timing the synchronous ingestion path
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record the elapsed time into the given metrics and return it
    pub fn finish(self, metrics: &IngestMetrics) -> Duration {
        let elapsed = self.start.elapsed();
        metrics.record_ack_duration(elapsed);
        elapsed
    }
}
