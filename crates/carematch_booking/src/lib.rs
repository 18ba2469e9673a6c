// --- File: crates/carematch_booking/src/lib.rs ---

pub mod auth; // Caller identity from the upstream identity provider
pub mod handlers; // Axum handlers for the booking API
pub mod logic; // Booking state machine
#[cfg(test)]
mod logic_test;
pub mod notify; // Booking notifications
pub mod routes; // Axum router definition for this crate
#[cfg(test)]
mod test_support;
#[cfg(feature = "openapi")]
pub mod doc;

// Re-export for main backend
pub use auth::CallerIdentity;
pub use handlers::BookingState;
pub use logic::{BookingEngine, Collaborators};
pub use notify::ConfiguredNotifier;
pub use routes::routes;
