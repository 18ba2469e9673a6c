// --- File: crates/carematch_booking/src/logic.rs ---
//! Booking state machine.
//!
//! A new booking runs: resolve both parties, check the slot against the therapist's
//! calendar, compute the subsidy waterfall, then write booking, ledger decrements and
//! payment in one transaction. Calendar event creation and notifications happen after the
//! commit and never fail the booking; a booking left without its event is picked up by
//! [`BookingEngine::repair_calendar_sync`].

use std::sync::Arc;
use std::time::Duration;

use carematch_common::models::{
    BookingMetadata, BookingSession, BookingStatus, ClientProfile, Role, SessionPayment,
    SubsidyBreakdown, TherapistProfile,
};
use carematch_common::services::{CalendarService, NotificationService, PaymentService};
use carematch_common::{bounded, internal_error, not_found, validation_error, CareMatchError};
use carematch_config::BookingConfig;
use carematch_db::{
    DbClient, DbError, DbTransaction, SqlBookingSessionRepository, SqlDirectoryRepository,
    SqlSubsidyLedgerRepository,
};
use carematch_gcal::{check_internal_overlap, SlotCoordinator, TokenEndpoint};
use carematch_stripe::{check_consistency, SettlementOrchestrator, StripeError};
use carematch_subsidy::SubsidyCalculator;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::CallerIdentity;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// The external services a [`BookingEngine`] is wired to.
pub trait Collaborators: Send + Sync + 'static {
    type Calendar: CalendarService + 'static;
    type Tokens: TokenEndpoint + 'static;
    type Payments: PaymentService<Error = StripeError> + 'static;
    type Notifier: NotificationService + 'static;
}

// --- Request / Response types ---

/// A booking request after the caller has been resolved.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub client_id: String,
    pub therapist_id: String,
    pub start_local: NaiveDateTime,
    pub end_local: NaiveDateTime,
    /// IANA zone of the local times. Falls back to the initiator's profile zone.
    pub time_zone: Option<String>,
    pub initiated_by: Role,
    pub notes: Option<String>,
}

/// Client-initiated booking.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ClientBookingRequest {
    pub therapist_id: String,
    /// Wall-clock start in `time_zone`, e.g. `2026-03-02T10:00:00`.
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "2026-03-02T10:00:00"))]
    pub start_time: NaiveDateTime,
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "2026-03-02T11:00:00"))]
    pub end_time: NaiveDateTime,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Only honoured for admins booking on a client's behalf.
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Therapist-initiated scheduling.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TherapistScheduleRequest {
    pub client_id: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "2026-03-02T10:00:00"))]
    pub start_time: NaiveDateTime,
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "2026-03-02T11:00:00"))]
    pub end_time: NaiveDateTime,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Only honoured for admins scheduling on a therapist's behalf.
    #[serde(default)]
    pub therapist_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct BookingOutcome {
    pub booking: BookingSession,
    /// `None` when the booking was kept as pending after a payment setup failure.
    pub payment: Option<SessionPayment>,
    pub subsidy: SubsidyBreakdown,
    /// Whether the calendar event was created in this request.
    pub calendar_synced: bool,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct BookingQuote {
    pub therapist_id: String,
    pub session_rate_cents: i64,
    pub subsidy: SubsidyBreakdown,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SettlementView {
    pub booking: BookingSession,
    pub payment: Option<SessionPayment>,
    /// Sum of the recorded group and direct allocations.
    pub allocated_cents: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RepairFailure {
    pub booking_id: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RepairReport {
    pub examined: usize,
    pub repaired: Vec<String>,
    pub failed: Vec<RepairFailure>,
}

/// Runtime knobs taken from [`BookingConfig`].
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub persist_pending_on_payment_failure: bool,
    pub call_timeout: Duration,
}

impl From<&BookingConfig> for BookingPolicy {
    fn from(config: &BookingConfig) -> Self {
        Self {
            persist_pending_on_payment_failure: config.persist_pending_on_payment_failure,
            call_timeout: Duration::from_secs(config.external_call_timeout_secs()),
        }
    }
}

fn status_template(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "booking_pending_payment",
        BookingStatus::Confirmed => "booking_confirmed",
        BookingStatus::Cancelled => "booking_cancelled",
        BookingStatus::Rescheduled => "booking_rescheduled",
        BookingStatus::Completed => "booking_completed",
    }
}

/// The user id a caller acts for: their own, or the one an admin names.
fn acting_for(
    caller: &CallerIdentity,
    role: Role,
    on_behalf_of: Option<String>,
) -> Result<String, CareMatchError> {
    caller.require(role)?;
    match (caller.is_admin(), on_behalf_of) {
        (true, Some(id)) => Ok(id),
        (true, None) => Err(validation_error(format!(
            "admins must name the {} to act for",
            role.as_str()
        ))),
        (false, Some(id)) if id != caller.user_id => Err(CareMatchError::Forbidden(format!(
            "cannot act for {} {}",
            role.as_str(),
            id
        ))),
        (false, _) => Ok(caller.user_id.clone()),
    }
}

pub struct BookingEngine<X: Collaborators> {
    db: DbClient,
    directory: SqlDirectoryRepository,
    bookings: SqlBookingSessionRepository,
    ledger: SqlSubsidyLedgerRepository,
    slots: Arc<SlotCoordinator<X::Calendar, X::Tokens>>,
    subsidy: SubsidyCalculator,
    settlement: Arc<SettlementOrchestrator<X::Payments>>,
    notifier: Arc<X::Notifier>,
    policy: BookingPolicy,
}

impl<X: Collaborators> BookingEngine<X> {
    pub fn new(
        db: DbClient,
        slots: Arc<SlotCoordinator<X::Calendar, X::Tokens>>,
        settlement: Arc<SettlementOrchestrator<X::Payments>>,
        notifier: Arc<X::Notifier>,
        config: &BookingConfig,
    ) -> Self {
        let directory = SqlDirectoryRepository::new(db.clone());
        let ledger = SqlSubsidyLedgerRepository::new(db.clone());
        Self {
            bookings: SqlBookingSessionRepository::new(db.clone()),
            subsidy: SubsidyCalculator::new(
                directory.clone(),
                ledger.clone(),
                config.group_credit_value_cents,
            ),
            directory,
            ledger,
            db,
            slots,
            settlement,
            notifier,
            policy: BookingPolicy::from(config),
        }
    }

    pub fn settlement(&self) -> &Arc<SettlementOrchestrator<X::Payments>> {
        &self.settlement
    }

    // --- Entry points ---

    /// Client-initiated booking for the calling client.
    pub async fn book_as_client(
        &self,
        caller: &CallerIdentity,
        request: ClientBookingRequest,
    ) -> Result<BookingOutcome, CareMatchError> {
        let client_id = acting_for(caller, Role::Client, request.client_id)?;
        self.create_booking(NewBooking {
            client_id,
            therapist_id: request.therapist_id,
            start_local: request.start_time,
            end_local: request.end_time,
            time_zone: request.time_zone,
            initiated_by: caller.role,
            notes: request.notes,
        })
        .await
    }

    /// Therapist-initiated scheduling on the calling therapist's calendar.
    pub async fn schedule_as_therapist(
        &self,
        caller: &CallerIdentity,
        request: TherapistScheduleRequest,
    ) -> Result<BookingOutcome, CareMatchError> {
        let therapist_id = acting_for(caller, Role::Therapist, request.therapist_id)?;
        self.create_booking(NewBooking {
            client_id: request.client_id,
            therapist_id,
            start_local: request.start_time,
            end_local: request.end_time,
            time_zone: request.time_zone,
            initiated_by: caller.role,
            notes: request.notes,
        })
        .await
    }

    /// Creates a booking. Steps before the commit fail the request and leave no record;
    /// steps after it are best-effort.
    #[instrument(skip(self, request), fields(client_id = %request.client_id, therapist_id = %request.therapist_id))]
    pub async fn create_booking(&self, request: NewBooking) -> Result<BookingOutcome, CareMatchError> {
        if request.end_local <= request.start_local {
            return Err(validation_error("Session end must be after its start"));
        }

        let (client, therapist) = self
            .resolve_parties(&request.client_id, &request.therapist_id)
            .await?;
        let time_zone = resolve_time_zone(&request, &client, &therapist)?;

        let slot = self
            .slots
            .reserve_slot(&therapist.id, request.start_local, request.end_local, &time_zone)
            .await?;
        let breakdown = self
            .subsidy
            .compute_subsidy(&client.id, therapist.session_rate_cents)
            .await?;

        let now = Utc::now();
        let mut booking = BookingSession {
            id: Uuid::new_v4().to_string(),
            client_id: client.id.clone(),
            therapist_id: therapist.id.clone(),
            session_date: slot.session_date,
            session_start_time: slot.start_utc,
            session_end_time: slot.end_utc,
            status: BookingStatus::Confirmed,
            external_calendar_event_id: None,
            cancellation_reason: None,
            sponsoring_group_id: breakdown.group_id.clone().filter(|_| breakdown.group_cents > 0),
            total_cost_cents: breakdown.total_cost_cents,
            group_subsidy_cents: breakdown.group_cents,
            direct_subsidy_cents: breakdown.direct_cents,
            percentage_subsidy_cents: breakdown.percentage_cents,
            out_of_pocket_cents: breakdown.out_of_pocket_cents,
            metadata: BookingMetadata {
                client_time_zone: Some(slot.client_time_zone),
                therapist_time_zone: Some(slot.therapist_time_zone),
                initiated_by: Some(request.initiated_by.as_str().to_string()),
                notes: request.notes,
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        };

        let payment = self
            .commit_booking(&mut booking, &breakdown, &client, &therapist)
            .await?;
        info!(
            booking_id = %booking.id,
            status = %booking.status,
            out_of_pocket = booking.out_of_pocket_cents,
            subsidy = booking.subsidy_used_cents(),
            "Booking committed"
        );

        let calendar_synced = if booking.status.allows_calendar_event() {
            match self.sync_calendar(&mut booking, &client, &therapist).await {
                Ok(synced) => synced,
                Err(e) => {
                    warn!(
                        booking_id = %booking.id,
                        therapist_id = %booking.therapist_id,
                        kind = e.kind(),
                        "Calendar event not created, left for the repair pass: {}", e
                    );
                    false
                }
            }
        } else {
            false
        };

        self.notify_parties(&booking, &client, &therapist, status_template(booking.status))
            .await;

        Ok(BookingOutcome {
            booking,
            payment,
            subsidy: breakdown,
            calendar_synced,
        })
    }

    /// Side-effect free subsidy breakdown for a prospective session.
    #[instrument(skip(self))]
    pub async fn quote_booking(
        &self,
        client_id: &str,
        therapist_id: &str,
    ) -> Result<BookingQuote, CareMatchError> {
        let (client, therapist) = self.resolve_parties(client_id, therapist_id).await?;
        let subsidy = self
            .subsidy
            .compute_subsidy(&client.id, therapist.session_rate_cents)
            .await?;
        Ok(BookingQuote {
            therapist_id: therapist.id,
            session_rate_cents: therapist.session_rate_cents,
            subsidy,
        })
    }

    pub async fn get_booking(
        &self,
        caller: &CallerIdentity,
        booking_id: &str,
    ) -> Result<BookingSession, CareMatchError> {
        let booking = self.find(booking_id).await?;
        caller.ensure_party_to(&booking)?;
        Ok(booking)
    }

    /// Moves a booking to `next`.
    ///
    /// Repeating the current status is a no-op. Leaving a calendar-bearing state removes
    /// the external event after the new status is stored; a failed deletion is logged
    /// only. Confirming a booking that has no payment yet sets the payment up first.
    #[instrument(skip(self, caller, reason), fields(caller_id = %caller.user_id))]
    pub async fn update_booking_status(
        &self,
        caller: &CallerIdentity,
        booking_id: &str,
        next: BookingStatus,
        reason: Option<String>,
    ) -> Result<BookingSession, CareMatchError> {
        let booking = self.find(booking_id).await?;
        caller.ensure_party_to(&booking)?;

        if booking.status == next {
            debug!(booking_id = %booking_id, status = %next, "Status unchanged");
            return Ok(booking);
        }
        if !booking.status.can_transition_to(next) {
            return Err(CareMatchError::InvalidTransition {
                from: booking.status.to_string(),
                to: next.to_string(),
            });
        }
        if caller.role == Role::Client
            && !matches!(next, BookingStatus::Cancelled | BookingStatus::Rescheduled)
        {
            return Err(CareMatchError::Forbidden(
                "clients may only cancel or reschedule a booking".to_string(),
            ));
        }

        let (client, therapist) = self
            .resolve_parties(&booking.client_id, &booking.therapist_id)
            .await?;
        if next == BookingStatus::Confirmed {
            self.ensure_payment(&booking, &client, &therapist).await?;
        }

        let mut metadata = booking.metadata.clone();
        let mut event_id = booking.external_calendar_event_id.clone();
        let removed_event = if next.allows_calendar_event() {
            None
        } else {
            event_id.take()
        };
        if let Some(removed) = &removed_event {
            metadata.previous_calendar_event_ids.push(removed.clone());
            metadata.meeting_link = None;
            metadata.calendar_html_link = None;
        }
        let cancellation_reason = if next == BookingStatus::Cancelled {
            reason.or_else(|| booking.cancellation_reason.clone())
        } else {
            booking.cancellation_reason.clone()
        };

        let updated = self
            .bookings
            .update_status(
                &booking.id,
                booking.status,
                next,
                cancellation_reason.as_deref(),
                event_id.as_deref(),
                &metadata,
            )
            .await?;
        if !updated {
            let current = self.find(booking_id).await?;
            if current.status == next {
                return Ok(current);
            }
            warn!(booking_id = %booking_id, status = %current.status, "Booking changed concurrently");
            return Err(CareMatchError::InvalidTransition {
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }
        info!(booking_id = %booking_id, from = %booking.status, to = %next, "Booking status updated");

        if let Some(removed) = removed_event {
            if let Err(e) = self
                .slots
                .delete_session_event(&booking.therapist_id, &removed)
                .await
            {
                warn!(
                    booking_id = %booking_id,
                    event_id = %removed,
                    "Could not delete calendar event, status change kept: {}", e
                );
            }
        }

        let mut current = self.find(booking_id).await?;
        if next == BookingStatus::Confirmed && current.external_calendar_event_id.is_none() {
            if let Err(e) = self.sync_calendar(&mut current, &client, &therapist).await {
                warn!(booking_id = %booking_id, kind = e.kind(), "Calendar event not created on confirmation: {}", e);
            }
        }

        self.notify_parties(&current, &client, &therapist, status_template(next))
            .await;
        Ok(current)
    }

    /// Captures the held charge for a session that took place.
    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn capture_payment(
        &self,
        caller: &CallerIdentity,
        booking_id: &str,
    ) -> Result<SessionPayment, CareMatchError> {
        caller.require(Role::Therapist)?;
        let booking = self.find(booking_id).await?;
        caller.ensure_party_to(&booking)?;
        if booking.status == BookingStatus::Cancelled {
            return Err(CareMatchError::InvalidTransition {
                from: booking.status.to_string(),
                to: "captured".to_string(),
            });
        }
        self.verified_payment(&booking).await?;
        Ok(self.settlement.capture(booking_id).await?)
    }

    /// Cancels the held charge, e.g. inside the cancellation grace window.
    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn release_payment(
        &self,
        caller: &CallerIdentity,
        booking_id: &str,
    ) -> Result<SessionPayment, CareMatchError> {
        caller.require(Role::Therapist)?;
        let booking = self.find(booking_id).await?;
        caller.ensure_party_to(&booking)?;
        if booking.status == BookingStatus::Completed {
            return Err(CareMatchError::InvalidTransition {
                from: booking.status.to_string(),
                to: "released".to_string(),
            });
        }
        self.verified_payment(&booking).await?;
        Ok(self.settlement.release(booking_id).await?)
    }

    /// Cross-checks booking, payment and recorded allocations.
    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn verify_settlement(
        &self,
        caller: &CallerIdentity,
        booking_id: &str,
    ) -> Result<SettlementView, CareMatchError> {
        let booking = self.find(booking_id).await?;
        caller.ensure_party_to(&booking)?;

        let payment = self
            .settlement
            .repository()
            .find_by_booking(booking_id)
            .await?;
        if let Some(payment) = &payment {
            check_consistency(Some(&booking), payment)?;
        }

        let allocated_cents: i64 = self
            .ledger
            .allocations_for_booking(booking_id)
            .await?
            .iter()
            .map(|a| a.amount_cents)
            .sum();
        let expected = booking.group_subsidy_cents + booking.direct_subsidy_cents;
        if allocated_cents != expected {
            error!(
                booking_id = %booking_id,
                allocated = allocated_cents,
                expected = expected,
                "Subsidy allocations do not match the booking"
            );
            return Err(CareMatchError::InconsistentState(format!(
                "booking {} records {} cents of ledger subsidy but {} cents were allocated",
                booking_id, expected, allocated_cents
            )));
        }

        Ok(SettlementView {
            booking,
            payment,
            allocated_cents,
        })
    }

    /// Retries event creation for confirmed bookings that still have no calendar event.
    ///
    /// Event ids derive from the booking id, so a retry after a partially successful
    /// attempt finds the existing event instead of creating another.
    #[instrument(skip(self))]
    pub async fn repair_calendar_sync(&self, limit: i64) -> Result<RepairReport, CareMatchError> {
        let candidates = self
            .bookings
            .find_missing_calendar_events(limit.max(0))
            .await?;
        let mut report = RepairReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for mut booking in candidates {
            match self.repair_one(&mut booking).await {
                Ok(true) => report.repaired.push(booking.id),
                Ok(false) => {}
                Err(e) => {
                    warn!(booking_id = %booking.id, kind = e.kind(), "Calendar repair failed: {}", e);
                    report.failed.push(RepairFailure {
                        booking_id: booking.id,
                        kind: e.kind().to_string(),
                        message: e.user_message(),
                    });
                }
            }
        }

        info!(
            examined = report.examined,
            repaired = report.repaired.len(),
            failed = report.failed.len(),
            "Calendar repair pass finished"
        );
        Ok(report)
    }

    // --- Calendar onboarding ---

    pub async fn calendar_authorization_url(&self, therapist_id: &str) -> Result<String, CareMatchError> {
        self.directory
            .find_therapist(therapist_id)
            .await?
            .ok_or_else(|| not_found(format!("therapist {}", therapist_id)))?;
        Ok(self.slots.tokens().authorization_url(therapist_id)?)
    }

    /// Finishes the OAuth redirect; returns the connected therapist's id.
    pub async fn complete_calendar_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> Result<String, CareMatchError> {
        let therapist_id = self.slots.tokens().complete_authorization(code, state).await?;
        info!(therapist_id = %therapist_id, "Calendar connected");
        Ok(therapist_id)
    }

    // --- Internals ---

    async fn find(&self, booking_id: &str) -> Result<BookingSession, CareMatchError> {
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| not_found(format!("booking {}", booking_id)))
    }

    async fn resolve_parties(
        &self,
        client_id: &str,
        therapist_id: &str,
    ) -> Result<(ClientProfile, TherapistProfile), CareMatchError> {
        let client = self
            .directory
            .find_client(client_id)
            .await?
            .ok_or_else(|| not_found(format!("client {}", client_id)))?;
        let therapist = self
            .directory
            .find_therapist(therapist_id)
            .await?
            .ok_or_else(|| not_found(format!("therapist {}", therapist_id)))?;
        Ok((client, therapist))
    }

    /// Overlap check, booking row, ledger decrements and payment in one transaction.
    ///
    /// Returns `None` when payment setup failed and policy keeps the booking as pending.
    async fn commit_booking(
        &self,
        booking: &mut BookingSession,
        breakdown: &SubsidyBreakdown,
        client: &ClientProfile,
        therapist: &TherapistProfile,
    ) -> Result<Option<SessionPayment>, CareMatchError> {
        let mut tx = self.db.begin().await?;
        self.write_booking(&mut tx, booking, breakdown).await?;

        let settled = self
            .settlement
            .settle_booking(&mut tx, booking, client, therapist)
            .await;
        let payment = match settled {
            Ok(payment) => payment,
            Err(e) if e.is_payment_setup() && self.policy.persist_pending_on_payment_failure => {
                tx.rollback().await.map_err(DbError::from)?;
                warn!(booking_id = %booking.id, "Payment setup failed, keeping booking as pending: {}", e);
                booking.status = BookingStatus::Pending;
                let mut tx = self.db.begin().await?;
                self.write_booking(&mut tx, booking, breakdown).await?;
                tx.commit().await.map_err(DbError::from)?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = tx.commit().await {
            error!(booking_id = %booking.id, "Booking transaction failed to commit: {}", e);
            self.settlement.compensate(&payment).await;
            return Err(DbError::from(e).into());
        }
        Ok(Some(payment))
    }

    async fn write_booking(
        &self,
        tx: &mut DbTransaction<'_>,
        booking: &BookingSession,
        breakdown: &SubsidyBreakdown,
    ) -> Result<(), CareMatchError> {
        self.bookings
            .lock_therapist_schedule(tx, &booking.therapist_id)
            .await?;
        let existing = self
            .bookings
            .find_overlapping(
                tx,
                &booking.therapist_id,
                booking.session_start_time,
                booking.session_end_time,
            )
            .await?;
        check_internal_overlap(&existing, booking.session_start_time, booking.session_end_time)?;
        self.bookings.insert(tx, booking).await?;
        self.subsidy
            .apply_allocation(tx, &booking.id, breakdown)
            .await?;
        Ok(())
    }

    /// Sets up the payment for a booking that has none (kept pending earlier).
    async fn ensure_payment(
        &self,
        booking: &BookingSession,
        client: &ClientProfile,
        therapist: &TherapistProfile,
    ) -> Result<(), CareMatchError> {
        if self
            .settlement
            .repository()
            .find_by_booking(&booking.id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let mut tx = self.db.begin().await?;
        let payment = self
            .settlement
            .settle_booking(&mut tx, booking, client, therapist)
            .await?;
        if let Err(e) = tx.commit().await {
            error!(booking_id = %booking.id, "Payment record failed to commit: {}", e);
            self.settlement.compensate(&payment).await;
            return Err(DbError::from(e).into());
        }
        info!(booking_id = %booking.id, payment_reference = %payment.external_payment_reference, "Payment set up on confirmation");
        Ok(())
    }

    async fn verified_payment(&self, booking: &BookingSession) -> Result<SessionPayment, CareMatchError> {
        let payment = self.settlement.load(&booking.id).await?;
        check_consistency(Some(booking), &payment)?;
        Ok(payment)
    }

    async fn repair_one(&self, booking: &mut BookingSession) -> Result<bool, CareMatchError> {
        let (client, therapist) = self
            .resolve_parties(&booking.client_id, &booking.therapist_id)
            .await?;
        self.sync_calendar(booking, &client, &therapist).await
    }

    /// Creates the calendar event and stores its id and links on the booking.
    ///
    /// Returns `false` when the booking moved on while the event was being created; the
    /// orphaned event is removed again.
    async fn sync_calendar(
        &self,
        booking: &mut BookingSession,
        client: &ClientProfile,
        therapist: &TherapistProfile,
    ) -> Result<bool, CareMatchError> {
        let summary = format!("Therapy session: {} with {}", client.full_name, therapist.full_name);
        let event = self
            .slots
            .create_session_event(
                booking,
                &summary,
                vec![client.email.clone(), therapist.email.clone()],
            )
            .await?;

        let mut metadata = booking.metadata.clone();
        metadata.meeting_link = event.meeting_link.clone();
        metadata.calendar_html_link = event.html_link.clone();

        if self
            .bookings
            .attach_calendar_event(&booking.id, &event.event_id, &metadata)
            .await?
        {
            info!(booking_id = %booking.id, event_id = %event.event_id, "Calendar event attached");
            booking.external_calendar_event_id = Some(event.event_id);
            booking.metadata = metadata;
            return Ok(true);
        }

        let current = self.find(&booking.id).await?;
        if current.external_calendar_event_id.as_deref() == Some(event.event_id.as_str()) {
            *booking = current;
            return Ok(true);
        }
        warn!(
            booking_id = %booking.id,
            status = %current.status,
            event_id = %event.event_id,
            "Booking changed while its calendar event was created, removing the event"
        );
        if let Err(e) = self
            .slots
            .delete_session_event(&booking.therapist_id, &event.event_id)
            .await
        {
            warn!(booking_id = %booking.id, event_id = %event.event_id, "Could not remove orphaned event: {}", e);
        }
        *booking = current;
        Ok(false)
    }

    async fn notify_parties(
        &self,
        booking: &BookingSession,
        client: &ClientProfile,
        therapist: &TherapistProfile,
        template: &str,
    ) {
        let data = json!({
            "booking_id": booking.id,
            "status": booking.status,
            "client_name": client.full_name,
            "therapist_name": therapist.full_name,
            "session_start": booking.session_start_time,
            "session_end": booking.session_end_time,
            "client_time_zone": booking.metadata.client_time_zone,
            "therapist_time_zone": booking.metadata.therapist_time_zone,
            "meeting_link": booking.metadata.meeting_link,
            "out_of_pocket_cents": booking.out_of_pocket_cents,
            "cancellation_reason": booking.cancellation_reason,
        });
        self.notify(&booking.id, &client.email, template, data.clone())
            .await;
        self.notify(&booking.id, &therapist.email, template, data)
            .await;
    }

    async fn notify(&self, booking_id: &str, to: &str, template: &str, data: Value) {
        let sent = bounded("notifications", self.policy.call_timeout, async {
            self.notifier
                .send(to, template, data)
                .await
                .map_err(internal_error)
        })
        .await;
        match sent {
            Ok(result) => debug!(booking_id = %booking_id, template = %template, message_id = %result.id, "Notification sent"),
            Err(e) => warn!(booking_id = %booking_id, template = %template, "Notification failed: {}", e),
        }
    }
}

fn resolve_time_zone(
    request: &NewBooking,
    client: &ClientProfile,
    therapist: &TherapistProfile,
) -> Result<String, CareMatchError> {
    let given = |zone: &Option<String>| zone.as_ref().filter(|tz| !tz.trim().is_empty()).cloned();
    let profile_zone = match request.initiated_by {
        Role::Therapist => given(&therapist.time_zone),
        Role::Client | Role::Admin => given(&client.time_zone),
    };
    given(&request.time_zone)
        .or(profile_zone)
        .ok_or_else(|| validation_error("A time zone is required for the session times"))
}
