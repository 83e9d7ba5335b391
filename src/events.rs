//! Booking provider event envelope and typed event tags
//!
//! The provider delivers an order-insensitive JSON object with four required
//! fields: `id`, `type`, `data`, `occurred_at`. The `data` payload is stored
//! verbatim; only the envelope is validated here, and only after signature
//! verification has passed.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{WebhookError, WebhookResult};

/// Provider event types with dedicated business handlers.
///
/// The envelope's `type` field stays an open-ended string; this enum exists
/// so handlers and stats can match on the lifecycle events the platform
/// cares about without string comparisons everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingEventType {
    /// A booking was confirmed by the provider
    #[serde(rename = "booking.confirmed")]
    BookingConfirmed,

    /// A booking was cancelled
    #[serde(rename = "booking.cancelled")]
    BookingCancelled,

    /// Payment for a booking was captured
    #[serde(rename = "payment.captured")]
    PaymentCaptured,

    /// Payment for a booking failed
    #[serde(rename = "payment.failed")]
    PaymentFailed,

    /// A refund was issued
    #[serde(rename = "refund.issued")]
    RefundIssued,

    /// Catch-all for tags without a dedicated handler
    #[serde(other)]
    Unknown,
}

impl FromStr for BookingEventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "booking.confirmed" => Self::BookingConfirmed,
            "booking.cancelled" => Self::BookingCancelled,
            "payment.captured" => Self::PaymentCaptured,
            "payment.failed" => Self::PaymentFailed,
            "refund.issued" => Self::RefundIssued,
            _ => Self::Unknown,
        })
    }
}

impl BookingEventType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingConfirmed => "booking.confirmed",
            Self::BookingCancelled => "booking.cancelled",
            Self::PaymentCaptured => "payment.captured",
            Self::PaymentFailed => "payment.failed",
            Self::RefundIssued => "refund.issued",
            Self::Unknown => "unknown",
        }
    }

    /// Check if this is a known event type
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Provider event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    /// Provider-assigned globally unique event id; the idempotency token
    pub id: String,

    /// Open-ended event type tag
    #[serde(rename = "type")]
    pub event_type: String,

    /// Opaque structured payload, stored verbatim
    pub data: serde_json::Value,

    /// When the event occurred at the provider (ISO-8601)
    pub occurred_at: DateTime<Utc>,
}

impl BookingEvent {
    /// Parse and validate an envelope from raw JSON bytes.
    ///
    /// All four fields are required; a missing or mistyped field is a
    /// [`WebhookError::Validation`]. The raw bytes must already have passed
    /// signature verification.
    pub fn from_bytes(bytes: &[u8]) -> WebhookResult<Self> {
        let event: BookingEvent = serde_json::from_slice(bytes)
            .map_err(|e| WebhookError::Validation(e.to_string()))?;

        if event.id.is_empty() {
            return Err(WebhookError::Validation("field `id` is empty".to_string()));
        }
        if event.event_type.is_empty() {
            return Err(WebhookError::Validation(
                "field `type` is empty".to_string(),
            ));
        }

        Ok(event)
    }

    /// Get the typed event tag
    pub fn typed_event_type(&self) -> BookingEventType {
        // Infallible error type means this can never fail
        BookingEventType::from_str(&self.event_type).unwrap()
    }
}
