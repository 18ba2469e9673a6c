// --- File: crates/carematch_booking/src/doc.rs ---

// Only compile this module if the 'openapi' feature is enabled
#![cfg(feature = "openapi")]
// Allow dead code for the dummy functions used by utoipa macros
#![allow(dead_code)]

use carematch_common::models::{
    BookingMetadata, BookingSession, BookingStatus, DirectDraw, PaymentStatus, Role,
    SessionPayment, SubsidyBreakdown,
};
use utoipa::OpenApi;

use crate::handlers::{
    CalendarConnectResponse, CalendarConnectedResponse, OAuthCallbackQuery, QuoteQuery,
    RepairQuery, UpdateStatusRequest,
};
use crate::logic::{
    BookingOutcome, BookingQuote, ClientBookingRequest, RepairFailure, RepairReport,
    SettlementView, TherapistScheduleRequest,
};

#[utoipa::path(
    post,
    path = "/bookings", // Path relative to /api
    request_body(
        content = ClientBookingRequest,
        description = "Session window in the client's local time",
        example = json!({
            "therapist_id": "ther-1",
            "start_time": "2026-03-02T10:00:00",
            "end_time": "2026-03-02T11:00:00",
            "time_zone": "America/Chicago",
            "notes": "First session"
        })
    ),
    params(
        ("x-user-id" = String, Header, description = "Resolved user id"),
        ("x-user-role" = String, Header, description = "client, therapist or admin")
    ),
    responses(
        (status = 201, description = "Booking committed", body = BookingOutcome),
        (status = 400, description = "Malformed session window or time zone"),
        (status = 401, description = "Missing caller identity"),
        (status = 402, description = "Payment could not be set up"),
        (status = 404, description = "Client or therapist not found"),
        (status = 409, description = "Time no longer available"),
        (status = 424, description = "Therapist must reconnect their calendar"),
        (status = 503, description = "Temporary failure, safe to retry")
    ),
    tag = "Bookings"
)]
fn doc_create_booking_handler() {}

#[utoipa::path(
    post,
    path = "/therapist/bookings",
    request_body(
        content = TherapistScheduleRequest,
        example = json!({
            "client_id": "client-1",
            "start_time": "2026-03-02T16:00:00",
            "end_time": "2026-03-02T17:00:00",
            "time_zone": "America/New_York"
        })
    ),
    params(
        ("x-user-id" = String, Header, description = "Resolved user id"),
        ("x-user-role" = String, Header, description = "therapist or admin")
    ),
    responses(
        (status = 201, description = "Booking committed", body = BookingOutcome),
        (status = 403, description = "Caller is not a therapist"),
        (status = 409, description = "Time no longer available")
    ),
    tag = "Bookings"
)]
fn doc_schedule_booking_handler() {}

#[utoipa::path(
    get,
    path = "/bookings/quote",
    params(QuoteQuery),
    responses(
        (status = 200, description = "Subsidy breakdown, nothing consumed", body = BookingQuote),
        (status = 404, description = "Client or therapist not found")
    ),
    tag = "Bookings"
)]
fn doc_quote_booking_handler() {}

#[utoipa::path(
    get,
    path = "/bookings/{id}",
    params(("id" = String, Path, description = "Booking id")),
    responses(
        (status = 200, description = "The booking", body = BookingSession),
        (status = 403, description = "Booking belongs to someone else"),
        (status = 404, description = "Booking not found")
    ),
    tag = "Bookings"
)]
fn doc_get_booking_handler() {}

#[utoipa::path(
    patch,
    path = "/bookings/{id}/status",
    params(("id" = String, Path, description = "Booking id")),
    request_body(content = UpdateStatusRequest, example = json!({
        "status": "cancelled",
        "reason": "Client is unwell"
    })),
    responses(
        (status = 200, description = "Status stored", body = BookingSession),
        (status = 403, description = "Caller may not make this change"),
        (status = 409, description = "Transition not allowed from the current status")
    ),
    tag = "Bookings"
)]
fn doc_update_status_handler() {}

#[utoipa::path(
    post,
    path = "/bookings/{id}/capture",
    params(("id" = String, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Payment captured (or already was)", body = SessionPayment),
        (status = 409, description = "Payment was released or booking cancelled"),
        (status = 500, description = "Payment does not match its booking")
    ),
    tag = "Settlement"
)]
fn doc_capture_payment_handler() {}

#[utoipa::path(
    post,
    path = "/bookings/{id}/release",
    params(("id" = String, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Hold released (or already was)", body = SessionPayment),
        (status = 409, description = "Payment was already captured")
    ),
    tag = "Settlement"
)]
fn doc_release_payment_handler() {}

#[utoipa::path(
    get,
    path = "/bookings/{id}/settlement",
    params(("id" = String, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Booking, payment and allocations agree", body = SettlementView),
        (status = 500, description = "Records disagree")
    ),
    tag = "Settlement"
)]
fn doc_settlement_handler() {}

#[utoipa::path(
    post,
    path = "/admin/calendar/repair",
    params(RepairQuery),
    responses(
        (status = 200, description = "Repair pass finished", body = RepairReport),
        (status = 403, description = "Caller is not an admin")
    ),
    tag = "Calendar"
)]
fn doc_repair_calendar_handler() {}

#[utoipa::path(
    get,
    path = "/calendar/connect",
    responses(
        (status = 200, description = "Consent URL for the calling therapist", body = CalendarConnectResponse),
        (status = 403, description = "Caller is not a therapist")
    ),
    tag = "Calendar"
)]
fn doc_calendar_connect_handler() {}

#[utoipa::path(
    get,
    path = "/calendar/oauth/callback",
    params(OAuthCallbackQuery),
    responses(
        (status = 200, description = "Calendar connected", body = CalendarConnectedResponse),
        (status = 400, description = "No refresh token issued or code rejected"),
        (status = 403, description = "Invalid or expired state")
    ),
    tag = "Calendar"
)]
fn doc_calendar_callback_handler() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        doc_create_booking_handler,
        doc_schedule_booking_handler,
        doc_quote_booking_handler,
        doc_get_booking_handler,
        doc_update_status_handler,
        doc_capture_payment_handler,
        doc_release_payment_handler,
        doc_settlement_handler,
        doc_repair_calendar_handler,
        doc_calendar_connect_handler,
        doc_calendar_callback_handler
    ),
    components(schemas(
        ClientBookingRequest,
        TherapistScheduleRequest,
        UpdateStatusRequest,
        BookingOutcome,
        BookingQuote,
        SettlementView,
        RepairReport,
        RepairFailure,
        CalendarConnectResponse,
        CalendarConnectedResponse,
        BookingSession,
        BookingMetadata,
        BookingStatus,
        SessionPayment,
        PaymentStatus,
        SubsidyBreakdown,
        DirectDraw,
        Role
    )),
    tags(
        (name = "Bookings", description = "Client and therapist booking entry points"),
        (name = "Settlement", description = "Capture and release of held charges"),
        (name = "Calendar", description = "Therapist calendar onboarding and repair")
    )
)]
pub struct BookingApiDoc;
