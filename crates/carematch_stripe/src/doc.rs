// --- File: crates/carematch_stripe/src/doc.rs ---
#![allow(dead_code)]
#![cfg(feature = "openapi")]
use utoipa::OpenApi;

use crate::handlers::WebhookAck;
use crate::logic::{StripeEvent, StripeEventData, StripePaymentIntentObject};

#[utoipa::path(
    post,
    path = "/stripe/webhook", // Path relative to /api
    request_body(content = StripeEvent, example = json!({
        "id": "evt_1Nq...",
        "object": "event",
        "created": 1767225600,
        "livemode": false,
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_3Nq...", "status": "succeeded", "amount": 10000, "currency": "usd" } }
    })),
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac-sha256>")),
    responses(
        (status = 200, description = "Webhook received and acknowledged", body = WebhookAck),
        (status = 400, description = "Bad Request (invalid signature or payload)"),
        (status = 503, description = "Temporary failure, Stripe retries")
    ),
    tag = "Stripe Webhooks"
)]
fn doc_stripe_webhook_handler() {}

#[derive(OpenApi)]
#[openapi(
    paths(doc_stripe_webhook_handler),
    components(schemas(StripeEvent, StripeEventData, StripePaymentIntentObject, WebhookAck)),
    tags(
        (name = "Stripe Webhooks", description = "Stripe Server-to-Server Webhooks")
    )
)]
pub struct StripeApiDoc;
