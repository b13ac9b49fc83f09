//! Verification of the provider's `Stripe-Signature` header:
//! `t=<unix ts>,v1=<hex hmac-sha256("<ts>.<raw body>")>[,v1=...]`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::WebhookEvent;
use crate::utils::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum clock skew accepted between signing and receipt.
pub const TOLERANCE_SECS: i64 = 300;

fn rejected(reason: &str) -> AppError {
    AppError::WebhookSignature(reason.to_string())
}

/// Fails closed: an empty secret or malformed header is a rejection.
pub fn verify(payload: &[u8], header: &str, secret: &str, now: i64) -> AppResult<()> {
    if secret.is_empty() {
        return Err(rejected("Webhook secret is not configured"));
    }

    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| rejected("Missing timestamp in signature header"))?;
    if candidates.is_empty() {
        return Err(rejected("Missing v1 signature in signature header"));
    }
    if (now - timestamp).abs() > TOLERANCE_SECS {
        return Err(rejected("Signature timestamp outside tolerance"));
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| rejected("Invalid secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = candidates
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
    if matched {
        Ok(())
    } else {
        Err(rejected("No signature matches the payload"))
    }
}

/// Verifies the signature, then parses the event body.
pub fn construct_event(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    now: i64,
) -> AppResult<WebhookEvent> {
    let header = header.ok_or_else(|| rejected("Missing signature header"))?;
    verify(payload, header, secret, now)?;

    serde_json::from_slice(payload)
        .map_err(|e| AppError::ValidationError(format!("Malformed webhook payload: {e}")))
}
