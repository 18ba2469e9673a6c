// --- File: crates/carematch_stripe/src/logic.rs ---
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::StripeError;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Maximum age of a signed webhook, matching Stripe's own client libraries.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Platform share of a session, taken on the *total* cost and capped at the held amount
/// because the processor rejects a fee larger than the charge.
pub fn platform_fee_cents(total_cost_cents: i64, fee_percent: i64, charge_cents: i64) -> i64 {
    let fee = total_cost_cents.max(0) * fee_percent.clamp(0, 100) / 100;
    fee.min(charge_cents.max(0))
}

// --- Webhook Event Structures ---

/// `data` of an event; `object` is the resource the event is about.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StripeEventData {
    /// The object the event is about; its shape depends on the event type.
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub object: serde_json::Value,
}

/// Envelope of every webhook delivery.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StripeEvent {
    pub id: String,
    #[serde(default)]
    pub object: String, // "event"
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub created: i64, // Unix timestamp
    #[serde(default)]
    pub livemode: bool,
    #[serde(rename = "type")]
    pub event_type: String, // e.g., "payment_intent.succeeded"
    pub data: StripeEventData,
}

/// The `data.object` of `payment_intent.*` events.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StripePaymentIntentObject {
    pub id: String,
    pub status: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Settlement a payment intent event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Canceled,
    Failed,
}

impl StripeEvent {
    /// `None` for event types that do not settle a payment.
    pub fn payment_event_kind(&self) -> Option<PaymentEventKind> {
        match self.event_type.as_str() {
            "payment_intent.succeeded" => Some(PaymentEventKind::Succeeded),
            "payment_intent.canceled" => Some(PaymentEventKind::Canceled),
            "payment_intent.payment_failed" => Some(PaymentEventKind::Failed),
            _ => None,
        }
    }

    pub fn payment_intent(&self) -> Result<StripePaymentIntentObject, StripeError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            StripeError::WebhookProcessingError(format!(
                "Failed to parse payment intent object: {}",
                e
            ))
        })
    }
}

// --- Webhook Signature Verification ---

type HmacSha256 = Hmac<Sha256>;

fn signature_error(message: &str) -> StripeError {
    StripeError::WebhookSignatureError(message.to_string())
}

/// The parts of a `Stripe-Signature` header this service checks: `t=` and every `v1=`.
#[derive(Debug)]
struct SignatureHeader<'a> {
    timestamp: &'a str,
    signed_at: i64,
    v1: Vec<&'a str>,
}

impl<'a> SignatureHeader<'a> {
    fn parse(raw: &'a str) -> Result<Self, StripeError> {
        let mut timestamp = None;
        let mut v1 = Vec::new();
        for (key, value) in raw.split(',').filter_map(|part| part.trim().split_once('=')) {
            match key {
                "t" => timestamp = Some(value),
                "v1" => v1.push(value),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| signature_error("Missing timestamp in Stripe-Signature"))?;
        let signed_at = timestamp
            .parse::<i64>()
            .map_err(|_| signature_error("Invalid timestamp in Stripe-Signature"))?;
        if v1.is_empty() {
            return Err(signature_error("Missing v1 signature in Stripe-Signature"));
        }
        Ok(Self {
            timestamp,
            signed_at,
            v1,
        })
    }
}

fn signing_mac(
    secret: &str,
    timestamp: &str,
    payload_bytes: &[u8],
) -> Result<HmacSha256, StripeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| signature_error("Webhook secret cannot key HMAC-SHA256"))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload_bytes);
    Ok(mac)
}

/// Checks `Stripe-Signature` against the raw body using the endpoint's `whsec_...` secret.
pub fn verify_stripe_signature(
    payload_bytes: &[u8],
    sig_header: Option<&str>,
    secret: &str,
) -> Result<(), StripeError> {
    verify_stripe_signature_at(payload_bytes, sig_header, secret, Utc::now().timestamp())
}

/// [`verify_stripe_signature`] against an explicit clock. Passes when any `v1` entry
/// matches and the signing time is within [`SIGNATURE_TOLERANCE_SECS`] of `now_unix`.
pub fn verify_stripe_signature_at(
    payload_bytes: &[u8],
    sig_header: Option<&str>,
    secret: &str,
    now_unix: i64,
) -> Result<(), StripeError> {
    let header = SignatureHeader::parse(
        sig_header.ok_or_else(|| signature_error("Missing Stripe-Signature header"))?,
    )?;

    let age = (now_unix - header.signed_at).abs();
    if age > SIGNATURE_TOLERANCE_SECS {
        warn!(age, "Stripe webhook signed outside the tolerance window");
        return Err(signature_error("Timestamp outside tolerance"));
    }

    let mac = signing_mac(secret, header.timestamp, payload_bytes)?;
    let matched = header
        .v1
        .iter()
        .filter_map(|candidate| hex::decode(candidate).ok())
        .any(|candidate| mac.clone().verify_slice(&candidate).is_ok());

    if matched {
        debug!("Stripe webhook signature verified");
        Ok(())
    } else {
        Err(signature_error("Signature mismatch"))
    }
}

/// Hex HMAC-SHA256 over `"{timestamp}.{payload}"`, the value Stripe sends as `v1`.
pub fn compute_signature(
    secret: &str,
    timestamp: &str,
    payload_bytes: &[u8],
) -> Result<String, StripeError> {
    let mac = signing_mac(secret, timestamp, payload_bytes)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}
