// --- File: crates/carematch_gcal/src/logic.rs ---
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use carematch_common::models::{intervals_overlap, BookingSession};
use carematch_common::services::{BusyInterval, CalendarService, SessionEvent, SessionEventRequest};
use carematch_common::{bounded, FailureClass};
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::GcalError;
use crate::oauth::TokenEndpoint;
use crate::tokens::{ActiveClient, TokenLifecycleManager};

/// Absolute session window validated against the therapist's calendar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservedSlot {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    /// Calendar date of the start in the therapist's timezone.
    pub session_date: NaiveDate,
    pub client_time_zone: String,
    pub therapist_time_zone: String,
}

/// Deterministic Google event id for a booking (base32hex alphabet).
pub fn calendar_event_id(booking_id: &str) -> String {
    let hex: String = booking_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| matches!(c, '0'..='9' | 'a'..='v'))
        .collect();
    format!("cm{}", hex)
}

/// Deterministic conference request id; a replayed create reuses the same room.
pub fn conference_request_id(booking_id: &str) -> String {
    format!("carematch-{}", booking_id)
}

pub fn parse_time_zone(name: &str) -> Result<Tz, GcalError> {
    name.parse::<Tz>()
        .map_err(|_| GcalError::InvalidTime(format!("Unknown timezone '{}'", name)))
}

/// Resolves a wall-clock time in `tz` to an instant. Times inside a DST gap or fold are
/// rejected rather than guessed.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, GcalError> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(_, _) => Err(GcalError::InvalidTime(format!(
            "{} is ambiguous in {} (daylight saving transition)",
            local, tz
        ))),
        LocalResult::None => Err(GcalError::InvalidTime(format!(
            "{} does not exist in {} (daylight saving transition)",
            local, tz
        ))),
    }
}

/// Rejects `[start, end)` when it overlaps any session that still occupies its slot.
///
/// Local bookings are authoritative: this runs regardless of what free/busy says.
pub fn check_internal_overlap(
    existing: &[BookingSession],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), GcalError> {
    match existing
        .iter()
        .find(|session| session.status.blocks_slot() && session.overlaps(start, end))
    {
        Some(conflict) => Err(GcalError::SlotUnavailable(format!(
            "overlaps session {} ({} - {})",
            conflict.id, conflict.session_start_time, conflict.session_end_time
        ))),
        None => Ok(()),
    }
}

fn check_busy_overlap(
    busy: &[BusyInterval],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), GcalError> {
    match busy
        .iter()
        .find(|b| intervals_overlap(b.start, b.end, start, end))
    {
        Some(b) => Err(GcalError::SlotUnavailable(format!(
            "calendar busy {} - {}",
            b.start, b.end
        ))),
        None => Ok(()),
    }
}

/// Coordinates slot checks and session events on the therapist's external calendar.
pub struct SlotCoordinator<C: CalendarService, E: TokenEndpoint> {
    calendar: Arc<C>,
    tokens: Arc<TokenLifecycleManager<E>>,
    default_time_zone: Tz,
    call_timeout: StdDuration,
}

impl<C: CalendarService, E: TokenEndpoint> SlotCoordinator<C, E> {
    pub fn new(
        calendar: Arc<C>,
        tokens: Arc<TokenLifecycleManager<E>>,
        default_time_zone: &str,
        call_timeout: StdDuration,
    ) -> Self {
        let default_time_zone = default_time_zone.parse::<Tz>().unwrap_or_else(|_| {
            warn!("Unknown default timezone '{}', using America/New_York", default_time_zone);
            chrono_tz::America::New_York
        });
        Self {
            calendar,
            tokens,
            default_time_zone,
            call_timeout,
        }
    }

    pub fn tokens(&self) -> &TokenLifecycleManager<E> {
        &self.tokens
    }

    /// Validates a client-submitted local window against the therapist's calendar.
    ///
    /// Malformed times fail before any external call. A busy interval overlapping the
    /// window yields `SlotUnavailable`.
    #[instrument(skip(self))]
    pub async fn reserve_slot(
        &self,
        therapist_id: &str,
        start_local: NaiveDateTime,
        end_local: NaiveDateTime,
        client_time_zone: &str,
    ) -> Result<ReservedSlot, GcalError> {
        let client_tz = parse_time_zone(client_time_zone)?;
        let start_utc = local_to_utc(start_local, client_tz)?;
        let end_utc = local_to_utc(end_local, client_tz)?;
        if start_utc >= end_utc {
            return Err(GcalError::InvalidTime(
                "Session end must be after its start".to_string(),
            ));
        }

        let client = self.tokens.ensure_valid_tokens(therapist_id).await?;
        let therapist_tz = self.therapist_time_zone(&client).await;

        let busy = self
            .with_auth_retry(client, |c| {
                let calendar = &self.calendar;
                async move {
                    calendar
                        .get_busy_times(&c.access_token, &c.calendar_id, start_utc, end_utc)
                        .await
                }
            })
            .await?;
        check_busy_overlap(&busy, start_utc, end_utc)?;

        debug!(
            therapist_id = %therapist_id,
            "Slot {} - {} free ({} in therapist time)",
            start_utc,
            end_utc,
            start_utc.with_timezone(&therapist_tz)
        );

        Ok(ReservedSlot {
            start_utc,
            end_utc,
            session_date: start_utc.with_timezone(&therapist_tz).date_naive(),
            client_time_zone: client_tz.name().to_string(),
            therapist_time_zone: therapist_tz.name().to_string(),
        })
    }

    /// The calendar's timezone, or the configured default when the lookup fails.
    pub async fn therapist_time_zone(&self, client: &ActiveClient) -> Tz {
        let lookup = bounded(
            "gcal",
            self.call_timeout,
            async {
                self.calendar
                    .calendar_timezone(&client.access_token)
                    .await
                    .map_err(|e| GcalError::calendar(&e))
            },
        )
        .await;

        match lookup.and_then(|name| parse_time_zone(&name)) {
            Ok(tz) => tz,
            Err(e) => {
                warn!(
                    therapist_id = %client.therapist_id,
                    "Calendar timezone lookup failed, using {}: {}", self.default_time_zone, e
                );
                self.default_time_zone
            }
        }
    }

    /// Creates (or finds) the calendar event for a committed booking.
    ///
    /// The event id and conference request id derive from the booking id, so repeating
    /// this for the same booking never yields a second event or conference room.
    #[instrument(skip(self, booking, attendees), fields(booking_id = %booking.id))]
    pub async fn create_session_event(
        &self,
        booking: &BookingSession,
        summary: &str,
        attendees: Vec<String>,
    ) -> Result<SessionEvent, GcalError> {
        let client = self.tokens.ensure_valid_tokens(&booking.therapist_id).await?;
        let event_id = calendar_event_id(&booking.id);

        if let Some(existing) = self.find_event(client.clone(), &event_id).await? {
            info!(event_id = %event_id, "Calendar event already exists for booking");
            return require_meeting_link(existing);
        }

        let (start, end) = (booking.session_start_time, booking.session_end_time);
        let busy = self
            .with_auth_retry(client.clone(), |c| {
                let calendar = &self.calendar;
                async move {
                    calendar
                        .get_busy_times(&c.access_token, &c.calendar_id, start, end)
                        .await
                }
            })
            .await?;
        check_busy_overlap(&busy, start, end)?;

        let request = SessionEventRequest {
            event_id: event_id.clone(),
            conference_request_id: conference_request_id(&booking.id),
            summary: summary.to_string(),
            description: booking.metadata.notes.clone(),
            start,
            end,
            time_zone: booking
                .metadata
                .therapist_time_zone
                .clone()
                .unwrap_or_else(|| self.default_time_zone.name().to_string()),
            attendees,
        };

        let created = self
            .with_auth_retry(client.clone(), |c| {
                let calendar = &self.calendar;
                let request = request.clone();
                async move {
                    calendar
                        .create_event(&c.access_token, &c.calendar_id, request)
                        .await
                }
            })
            .await;

        match created {
            Ok(event) => require_meeting_link(event),
            // Duplicate id: an earlier attempt got through
            Err(GcalError::Calendar {
                class: FailureClass::Validation,
                message,
            }) => match self.find_event(client, &event_id).await? {
                Some(existing) => {
                    info!(event_id = %event_id, "Resolved duplicate create to existing event");
                    require_meeting_link(existing)
                }
                None => Err(GcalError::Calendar {
                    class: FailureClass::Validation,
                    message,
                }),
            },
            Err(e) => Err(e),
        }
    }

    /// Deletes a session event, notifying attendees. A missing event counts as deleted.
    #[instrument(skip(self))]
    pub async fn delete_session_event(&self, therapist_id: &str, event_id: &str) -> Result<(), GcalError> {
        let client = self.tokens.ensure_valid_tokens(therapist_id).await?;
        self.with_auth_retry(client, |c| {
            let calendar = &self.calendar;
            async move {
                calendar
                    .delete_event(&c.access_token, &c.calendar_id, event_id)
                    .await
            }
        })
        .await
    }

    async fn find_event(&self, client: ActiveClient, event_id: &str) -> Result<Option<SessionEvent>, GcalError> {
        self.with_auth_retry(client, |c| {
            let calendar = &self.calendar;
            async move { calendar.get_event(&c.access_token, &c.calendar_id, event_id).await }
        })
        .await
    }

    async fn bounded_call<T, Fut>(&self, fut: Fut) -> Result<T, GcalError>
    where
        Fut: Future<Output = Result<T, C::Error>>,
    {
        bounded("gcal", self.call_timeout, async move {
            fut.await.map_err(|e| GcalError::calendar(&e))
        })
        .await
    }

    /// Runs `op`, and after an auth-classified failure forces one token refresh and
    /// reissues the identical request.
    async fn with_auth_retry<T, F, Fut>(&self, client: ActiveClient, op: F) -> Result<T, GcalError>
    where
        F: Fn(ActiveClient) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        let therapist_id = client.therapist_id.clone();
        match self.bounded_call(op(client)).await {
            Err(GcalError::Calendar {
                class: FailureClass::Terminal,
                message,
            }) => {
                warn!(therapist_id = %therapist_id, "Calendar rejected access token, refreshing: {}", message);
                let refreshed = self.tokens.force_refresh(&therapist_id).await?;
                let retried = self.bounded_call(op(refreshed)).await;
                if let Err(GcalError::Calendar {
                    class: FailureClass::Terminal,
                    message,
                }) = &retried
                {
                    error!(therapist_id = %therapist_id, "Calendar rejected refreshed token: {}", message);
                }
                retried
            }
            other => other,
        }
    }
}

fn require_meeting_link(event: SessionEvent) -> Result<SessionEvent, GcalError> {
    if event.meeting_link.is_none() {
        error!(event_id = %event.event_id, "Calendar event returned without a meeting link");
        return Err(GcalError::MissingMeetingLink {
            event_id: event.event_id,
        });
    }
    Ok(event)
}
