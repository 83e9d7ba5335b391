//! Runtime configuration for the ingestion pipeline
//!
//! All settings are loaded from environment variables with a `TRAVELHOOK_`
//! prefix. No secrets are ever hardcoded; the webhook signing secret comes
//! exclusively from `TRAVELHOOK_WEBHOOK_SECRET`.
//!
//! # Environment Variables
//!
//! - `TRAVELHOOK_WEBHOOK_SECRET` (optional): HMAC-SHA256 signing secret
//!   shared with the booking provider. When unset, signature verification is
//!   skipped entirely. This is a deliberate escape hatch for non-production
//!   environments; a production deployment must always configure it.
//! - `TRAVELHOOK_RATE_LIMIT` (optional): requests per minute per source key
//!   (default: 100).
//! - `TRAVELHOOK_PROCESSING_TIMEOUT_SECS` (optional): per-handler deadline
//!   (default: 30).
//! - `TRAVELHOOK_STALE_AFTER_SECS` (optional): age at which a PROCESSING row
//!   is considered stalled (default: 300).
//! - `TRAVELHOOK_SWEEP_INTERVAL_SECS` (optional): staleness sweep period
//!   (default: 60).

use std::env;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{WebhookError, WebhookResult};

/// Default requests per minute per source key
const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default per-handler processing deadline
const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

/// Default age threshold for the stale-PROCESSING sweep
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Default staleness sweep period
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the webhook ingestion service
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC signing secret. `None` disables verification (dev only).
    pub webhook_secret: Option<String>,

    /// Requests per minute allowed per source key
    pub rate_limit_rpm: u32,

    /// Maximum wall-clock time a single handler invocation may take
    pub processing_timeout: Duration,

    /// Age after which a PROCESSING row is flagged as stalled
    pub stale_after: Duration,

    /// How often the staleness sweep runs
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Internal`] if a numeric variable is present
    /// but unparseable or zero.
    pub fn from_env() -> WebhookResult<Self> {
        let webhook_secret = match env::var("TRAVELHOOK_WEBHOOK_SECRET") {
            Ok(s) if s.is_empty() => None,
            Ok(s) => Some(s),
            Err(_) => None,
        };

        if webhook_secret.is_none() {
            warn!(
                "SECURITY: TRAVELHOOK_WEBHOOK_SECRET not set - \
                 signature verification is DISABLED"
            );
        } else if webhook_secret.as_deref().map(str::len).unwrap_or(0) < 32 {
            warn!("SECURITY WARNING: TRAVELHOOK_WEBHOOK_SECRET is less than 32 characters");
        }

        let rate_limit_rpm = env::var("TRAVELHOOK_RATE_LIMIT")
            .unwrap_or_else(|_| DEFAULT_RATE_LIMIT.to_string())
            .parse::<u32>()
            .map_err(|e| WebhookError::Internal(format!("invalid rate limit: {e}")))?;

        if rate_limit_rpm == 0 {
            return Err(WebhookError::Internal(
                "rate limit cannot be 0".to_string(),
            ));
        }

        let processing_timeout = parse_secs(
            "TRAVELHOOK_PROCESSING_TIMEOUT_SECS",
            DEFAULT_PROCESSING_TIMEOUT,
        )?;
        let stale_after = parse_secs("TRAVELHOOK_STALE_AFTER_SECS", DEFAULT_STALE_AFTER)?;
        let sweep_interval = parse_secs("TRAVELHOOK_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL)?;

        info!(
            rate_limit_rpm,
            processing_timeout_secs = processing_timeout.as_secs(),
            stale_after_secs = stale_after.as_secs(),
            "Webhook ingestion configuration loaded"
        );

        Ok(Self {
            webhook_secret,
            rate_limit_rpm,
            processing_timeout,
            stale_after,
            sweep_interval,
        })
    }

    /// Create a test configuration with a fixed secret and short deadlines
    pub fn test_config() -> Self {
        Self {
            webhook_secret: Some("test-signing-secret-for-unit-tests".to_string()),
            rate_limit_rpm: 100,
            processing_timeout: Duration::from_secs(5),
            stale_after: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

fn parse_secs(var: &str, default: Duration) -> WebhookResult<Duration> {
    match env::var(var) {
        Ok(raw) => {
            let secs = raw
                .parse::<u64>()
                .map_err(|e| WebhookError::Internal(format!("invalid {var}: {e}")))?;
            if secs == 0 {
                return Err(WebhookError::Internal(format!("{var} cannot be 0")));
            }
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_config_has_secret() {
        let config = Config::test_config();
        assert!(config.webhook_secret.is_some());
        assert_eq!(config.rate_limit_rpm, 100);
    }

    #[test]
    fn test_parse_secs_default() {
        let d = parse_secs(
            "TRAVELHOOK_NONEXISTENT_VAR_FOR_TEST",
            Duration::from_secs(7),
        )
        .unwrap();
        assert_eq!(d, Duration::from_secs(7));
    }
}
