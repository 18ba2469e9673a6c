// --- File: crates/carematch_common/src/services.rs ---
//! Service abstractions for external collaborators.
//!
//! The calendar, payment processor and notification sender sit behind these traits so
//! the booking core can be exercised with in-process mocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;

use crate::error::Classify;

/// Future returned by the collaborator traits; object safe and `Send`.
pub type BoxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// A busy interval reported by the external calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Event to create on the therapist's calendar for a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEventRequest {
    /// Deterministic event id derived from the booking id.
    pub event_id: String,
    /// Deterministic conference request id derived from the booking id.
    pub conference_request_id: String,
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub time_zone: String,
    pub attendees: Vec<String>,
}

/// An event as read back from the external calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_id: String,
    pub status: Option<String>,
    pub html_link: Option<String>,
    /// Video entry point, already filtered to the conferencing domain.
    pub meeting_link: Option<String>,
}

/// Calendar operations, authenticated per call with a fresh access token.
///
/// No client is cached across requests; the implementation builds one from the token it
/// is handed.
pub trait CalendarService: Send + Sync {
    /// Error type returned by calendar service operations.
    type Error: StdError + Classify + Send + Sync + 'static;

    /// The calendar's configured IANA timezone.
    fn calendar_timezone(&self, access_token: &str) -> BoxFuture<'_, String, Self::Error>;

    /// Busy intervals within `[start_time, end_time)`.
    fn get_busy_times(
        &self,
        access_token: &str,
        calendar_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> BoxFuture<'_, Vec<BusyInterval>, Self::Error>;

    /// Create an event with a video-conference request.
    fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: SessionEventRequest,
    ) -> BoxFuture<'_, SessionEvent, Self::Error>;

    /// Read an event; `None` when it does not exist.
    fn get_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> BoxFuture<'_, Option<SessionEvent>, Self::Error>;

    /// Delete an event and notify its attendees.
    fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> BoxFuture<'_, (), Self::Error>;
}

/// Parameters for a manually captured charge with a destination transfer. The charge is
/// confirmed off-session against `payment_method`, so a successful create leaves the
/// funds authorized and waiting for capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldChargeRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub payer_reference: String,
    /// Saved payment method of the payer that gets authorized.
    pub payment_method: String,
    pub payee_account: String,
    pub platform_fee_cents: i64,
    pub booking_id: String,
    /// Replays of the same key return the original charge.
    pub idempotency_key: String,
    pub description: Option<String>,
}

/// Result of a payment intent operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentResult {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub client_secret: Option<String>,
}

impl PaymentIntentResult {
    pub fn is_captured(&self) -> bool {
        self.status == "succeeded"
    }

    pub fn is_canceled(&self) -> bool {
        self.status == "canceled"
    }

    /// Authorized and waiting for capture.
    pub fn is_held(&self) -> bool {
        self.status == "requires_capture"
    }
}

/// Payment processor operations.
pub trait PaymentService: Send + Sync {
    /// Error type returned by payment service operations.
    type Error: StdError + Classify + Send + Sync + 'static;

    /// Default saved payment method of a payer, if they have one.
    fn default_payment_method(
        &self,
        payer_reference: &str,
    ) -> BoxFuture<'_, Option<String>, Self::Error>;

    /// Create and confirm a held (manual capture) charge.
    fn create_held_charge(
        &self,
        request: HeldChargeRequest,
    ) -> BoxFuture<'_, PaymentIntentResult, Self::Error>;

    fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> BoxFuture<'_, PaymentIntentResult, Self::Error>;

    fn capture_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> BoxFuture<'_, PaymentIntentResult, Self::Error>;

    fn cancel_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> BoxFuture<'_, PaymentIntentResult, Self::Error>;
}

/// Result of a notification operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResult {
    pub id: String,
    pub status: String,
}

/// Fire-and-forget notification sender.
pub trait NotificationService: Send + Sync {
    /// Error type returned by notification service operations.
    type Error: StdError + Send + Sync + 'static;

    /// Send a templated message; rendering happens on the receiving side.
    fn send(
        &self,
        to: &str,
        template: &str,
        data: serde_json::Value,
    ) -> BoxFuture<'_, NotificationResult, Self::Error>;
}
