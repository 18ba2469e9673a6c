// --- File: crates/carematch_booking/src/routes.rs ---

use crate::handlers::{
    calendar_callback_handler, calendar_connect_handler, capture_payment_handler,
    create_booking_handler, get_booking_handler, quote_booking_handler, release_payment_handler,
    repair_calendar_handler, schedule_booking_handler, settlement_handler, update_status_handler,
    BookingState,
};
use crate::logic::Collaborators;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

/// Creates a router containing all routes for the booking service.
pub fn routes<X: Collaborators>(state: Arc<BookingState<X>>) -> Router {
    info!("💡 Booking: Adding /bookings, /therapist/bookings and /calendar routes.");
    Router::new()
        .route("/bookings", post(create_booking_handler::<X>))
        .route("/bookings/quote", get(quote_booking_handler::<X>))
        .route("/bookings/{id}", get(get_booking_handler::<X>))
        .route("/bookings/{id}/status", patch(update_status_handler::<X>))
        .route("/bookings/{id}/capture", post(capture_payment_handler::<X>))
        .route("/bookings/{id}/release", post(release_payment_handler::<X>))
        .route("/bookings/{id}/settlement", get(settlement_handler::<X>))
        .route("/therapist/bookings", post(schedule_booking_handler::<X>))
        .route("/calendar/connect", get(calendar_connect_handler::<X>))
        .route("/calendar/oauth/callback", get(calendar_callback_handler::<X>))
        .route("/admin/calendar/repair", post(repair_calendar_handler::<X>))
        .with_state(state)
}
