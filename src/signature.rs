//! Webhook signature verification
//!
//! Authenticates inbound deliveries by computing HMAC-SHA256 over the *exact
//! raw bytes* of the request body and comparing the hex digest against the
//! `x-webhook-signature` header in constant time. Body parsing must only
//! happen after verification succeeds.
//!
//! When no secret is configured, verification is skipped with a warning.
//! This is an explicit escape hatch for non-production environments.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's hex-encoded HMAC-SHA256 signature
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Verifies provider signatures against a shared secret
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
}

impl SignatureVerifier {
    /// Create a verifier. `None` disables verification entirely.
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// Whether a secret is configured
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify a raw request body against the signature header value.
    ///
    /// Returns `true` when the signature matches, or when no secret is
    /// configured (skipped verification). A missing header always fails
    /// if a secret is configured.
    pub fn verify(&self, raw_body: &[u8], signature_header: Option<&str>) -> bool {
        let secret = match &self.secret {
            Some(s) => s,
            None => {
                warn!("Signature verification skipped: no webhook secret configured");
                return true;
            }
        };

        let provided = match signature_header {
            Some(h) if !h.is_empty() => h,
            _ => return false,
        };

        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(raw_body);
        let computed = hex::encode(mac.finalize().into_bytes());

        constant_time_eq(computed.as_bytes(), provided.as_bytes())
    }

    /// Compute the hex signature for a body. Used by tests and tooling.
    pub fn sign(secret: &str, raw_body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(raw_body);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
