// --- File: crates/carematch_gcal/src/lib.rs ---
// Therapist calendar integration: OAuth token lifecycle and slot coordination.
pub mod auth;
pub mod error;
pub mod logic;
#[cfg(test)]
mod logic_proptest;
pub mod oauth;
pub mod service;
#[cfg(test)]
mod test_support;
pub mod tokens;

pub use error::GcalError;
pub use logic::{check_internal_overlap, ReservedSlot, SlotCoordinator};
pub use oauth::{GoogleOAuthClient, OAuthError, OAuthSettings, StateSigner, TokenEndpoint};
pub use service::{GcalServiceError, GoogleCalendarService};
pub use tokens::{ActiveClient, TokenError, TokenLifecycleManager};
