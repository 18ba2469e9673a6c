// --- File: crates/carematch_booking/src/handlers.rs ---

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use carematch_common::models::{BookingSession, BookingStatus, Role, SessionPayment};
use carematch_common::CareMatchError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::auth::CallerIdentity;
use crate::logic::{
    BookingEngine, BookingQuote, ClientBookingRequest, Collaborators, RepairReport,
    SettlementView, TherapistScheduleRequest,
};

#[cfg(feature = "openapi")]
use utoipa::{IntoParams, ToSchema};

// --- State for Booking Handlers ---
pub struct BookingState<X: Collaborators> {
    pub engine: Arc<BookingEngine<X>>,
}

const DEFAULT_REPAIR_LIMIT: i64 = 50;

#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct UpdateStatusRequest {
    pub status: BookingStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "openapi", derive(IntoParams))]
pub struct QuoteQuery {
    pub therapist_id: String,
    /// Required unless the caller is the client.
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "openapi", derive(IntoParams))]
pub struct RepairQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "openapi", derive(IntoParams))]
pub struct OAuthCallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Serialize, Debug)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CalendarConnectResponse {
    pub authorization_url: String,
}

#[derive(Serialize, Debug)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CalendarConnectedResponse {
    pub therapist_id: String,
    pub integration_status: String,
}

// --- Handlers ---

/// POST /bookings
pub async fn create_booking_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Json(payload): Json<ClientBookingRequest>,
) -> Result<impl IntoResponse, CareMatchError> {
    let outcome = state.engine.book_as_client(&caller, payload).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /therapist/bookings
pub async fn schedule_booking_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Json(payload): Json<TherapistScheduleRequest>,
) -> Result<impl IntoResponse, CareMatchError> {
    let outcome = state.engine.schedule_as_therapist(&caller, payload).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /bookings/quote
pub async fn quote_booking_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<BookingQuote>, CareMatchError> {
    let client_id = match (caller.role, query.client_id) {
        (Role::Client, _) => caller.user_id.clone(),
        (_, Some(client_id)) => client_id,
        (_, None) => {
            return Err(CareMatchError::Validation(
                "client_id is required when quoting for someone else".to_string(),
            ))
        }
    };
    let quote = state
        .engine
        .quote_booking(&client_id, &query.therapist_id)
        .await?;
    Ok(Json(quote))
}

/// GET /bookings/{id}
pub async fn get_booking_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingSession>, CareMatchError> {
    Ok(Json(state.engine.get_booking(&caller, &booking_id).await?))
}

/// PATCH /bookings/{id}/status
pub async fn update_status_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Path(booking_id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<BookingSession>, CareMatchError> {
    let booking = state
        .engine
        .update_booking_status(&caller, &booking_id, payload.status, payload.reason)
        .await?;
    Ok(Json(booking))
}

/// POST /bookings/{id}/capture
pub async fn capture_payment_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Path(booking_id): Path<String>,
) -> Result<Json<SessionPayment>, CareMatchError> {
    Ok(Json(state.engine.capture_payment(&caller, &booking_id).await?))
}

/// POST /bookings/{id}/release
pub async fn release_payment_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Path(booking_id): Path<String>,
) -> Result<Json<SessionPayment>, CareMatchError> {
    Ok(Json(state.engine.release_payment(&caller, &booking_id).await?))
}

/// GET /bookings/{id}/settlement
pub async fn settlement_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Path(booking_id): Path<String>,
) -> Result<Json<SettlementView>, CareMatchError> {
    Ok(Json(state.engine.verify_settlement(&caller, &booking_id).await?))
}

/// POST /admin/calendar/repair
pub async fn repair_calendar_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
    Query(query): Query<RepairQuery>,
) -> Result<Json<RepairReport>, CareMatchError> {
    if !caller.is_admin() {
        return Err(CareMatchError::Forbidden(
            "calendar repair is restricted to admins".to_string(),
        ));
    }
    let limit = query.limit.unwrap_or(DEFAULT_REPAIR_LIMIT);
    info!(caller_id = %caller.user_id, limit, "Calendar repair requested");
    Ok(Json(state.engine.repair_calendar_sync(limit).await?))
}

/// GET /calendar/connect
pub async fn calendar_connect_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    caller: CallerIdentity,
) -> Result<Json<CalendarConnectResponse>, CareMatchError> {
    if caller.role != Role::Therapist {
        return Err(CareMatchError::Forbidden(
            "only therapists connect a calendar".to_string(),
        ));
    }
    let authorization_url = state
        .engine
        .calendar_authorization_url(&caller.user_id)
        .await?;
    Ok(Json(CalendarConnectResponse { authorization_url }))
}

/// GET /calendar/oauth/callback
///
/// Reached by the consent redirect, so it carries no caller identity; the signed `state`
/// names the therapist.
pub async fn calendar_callback_handler<X: Collaborators>(
    State(state): State<Arc<BookingState<X>>>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Json<CalendarConnectedResponse>, CareMatchError> {
    let therapist_id = state
        .engine
        .complete_calendar_authorization(&query.code, &query.state)
        .await?;
    Ok(Json(CalendarConnectedResponse {
        therapist_id,
        integration_status: "connected".to_string(),
    }))
}
