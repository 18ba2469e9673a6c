// --- File: crates/carematch_stripe/src/handlers.rs ---
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use carematch_common::services::PaymentService;
use carematch_common::CareMatchError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::StripeError;
use crate::logic::{verify_stripe_signature, StripeEvent};
use crate::settlement::{ReconcileOutcome, SettlementOrchestrator};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

// --- State for Stripe Handlers ---
pub struct StripeState<P> {
    pub orchestrator: Arc<SettlementOrchestrator<P>>,
    /// Signing secret (whsec_...). Webhooks are refused while it is unset.
    pub webhook_secret: Option<String>,
}

/// Acknowledgement returned to Stripe.
#[derive(Serialize, Debug)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WebhookAck {
    pub received: bool,
    /// settled, already_settled, unmatched or ignored
    pub outcome: String,
}

impl From<&ReconcileOutcome> for WebhookAck {
    fn from(outcome: &ReconcileOutcome) -> Self {
        let outcome = match outcome {
            ReconcileOutcome::Settled { .. } => "settled",
            ReconcileOutcome::AlreadySettled { .. } => "already_settled",
            ReconcileOutcome::Unmatched => "unmatched",
            ReconcileOutcome::Ignored => "ignored",
        };
        WebhookAck {
            received: true,
            outcome: outcome.to_string(),
        }
    }
}

/// Stripe server-to-server notifications for payment intents.
///
/// Signature errors and malformed payloads answer 400; transient ledger failures answer
/// 503 so Stripe retries. Events for unknown payments are acknowledged.
pub async fn stripe_webhook_handler<P>(
    State(state): State<Arc<StripeState<P>>>,
    headers: HeaderMap,
    body: String, // Raw body for signature verification
) -> Response
where
    P: PaymentService<Error = StripeError> + 'static,
{
    let Some(webhook_secret) = state.webhook_secret.as_deref() else {
        error!("Stripe webhook secret is not configured");
        return CareMatchError::from(StripeError::ConfigError).into_response();
    };

    let sig_header = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok());
    if let Err(e) = verify_stripe_signature(body.as_bytes(), sig_header, webhook_secret) {
        warn!("Stripe webhook signature verification failed: {}", e);
        return CareMatchError::from(e).into_response();
    }

    // Deserialize only after the signature checked out
    let event: StripeEvent = match serde_json::from_str(&body) {
        Ok(ev) => ev,
        Err(e) => {
            warn!("Failed to deserialize Stripe webhook event: {}", e);
            return CareMatchError::from(StripeError::WebhookProcessingError(format!(
                "Invalid payload format: {}",
                e
            )))
            .into_response();
        }
    };

    match state.orchestrator.reconcile_event(&event).await {
        Ok(outcome) => {
            info!(event_id = %event.id, ?outcome, "Stripe webhook processed");
            Json(WebhookAck::from(&outcome)).into_response()
        }
        Err(e) => {
            error!(event_id = %event.id, "Error processing Stripe webhook: {}", e);
            CareMatchError::from(e).into_response()
        }
    }
}
