// --- File: crates/carematch_stripe/src/lib.rs ---

pub mod doc;
pub mod error;
pub mod handlers;
pub mod logic;
#[cfg(test)]
mod logic_test;
pub mod routes;
pub mod service;
pub mod settlement;
#[cfg(test)]
mod test_support;

// Re-export for main backend
pub use error::StripeError;
pub use handlers::StripeState;
pub use logic::{platform_fee_cents, verify_stripe_signature, StripeEvent};
pub use routes::routes;
pub use service::StripePaymentService;
pub use settlement::{check_consistency, ReconcileOutcome, SettlementOrchestrator};
