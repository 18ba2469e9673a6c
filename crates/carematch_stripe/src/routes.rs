// --- File: crates/carematch_stripe/src/routes.rs ---

use crate::error::StripeError;
use crate::handlers::{stripe_webhook_handler, StripeState};
use axum::{routing::post, Router};
use carematch_common::services::PaymentService;
use std::sync::Arc;

/// Creates a router containing all routes for the Stripe feature.
pub fn routes<P>(state: Arc<StripeState<P>>) -> Router
where
    P: PaymentService<Error = StripeError> + 'static,
{
    Router::new()
        .route("/stripe/webhook", post(stripe_webhook_handler::<P>))
        .with_state(state)
}
