//! Google Calendar service implementation.
//!
//! Implements [`CalendarService`] on top of `google-calendar3`. Each call builds a hub
//! from the access token it was handed; see [`crate::auth::hub_for_token`].

use carematch_common::services::{
    BoxFuture, BusyInterval, CalendarService, SessionEvent, SessionEventRequest,
};
use carematch_common::{Classify, FailureClass, TimedOut};
use chrono::{DateTime, Utc};
use google_calendar3::api::{
    ConferenceData, ConferenceSolutionKey, CreateConferenceRequest, Event, EventAttendee,
    EventDateTime, FreeBusyRequest, FreeBusyRequestItem,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{build_connector, hub_for_token, Connector};

/// Errors that can occur when interacting with Google Calendar.
#[derive(Error, Debug, Clone)]
pub enum GcalServiceError {
    #[error("Google API error (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },
    #[error("Google Calendar call timed out: {0}")]
    Timeout(String),
    #[error("Google Calendar client setup failed: {0}")]
    Setup(String),
}

impl GcalServiceError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GcalServiceError::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// 401, or a 403 that is not a rate-limit signal.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            GcalServiceError::Api {
                status: Some(401), ..
            } => true,
            GcalServiceError::Api {
                status: Some(403),
                message,
            } => !is_rate_limit_message(message),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("ratelimit") || lowered.contains("rate limit") || lowered.contains("quota")
}

impl Classify for GcalServiceError {
    fn classify(&self) -> FailureClass {
        if self.is_auth_failure() {
            return FailureClass::Terminal;
        }
        match self {
            GcalServiceError::Api { status, .. } => match status {
                Some(400) | Some(404) | Some(409) | Some(410) => FailureClass::Validation,
                _ => FailureClass::Transient,
            },
            GcalServiceError::Timeout(_) => FailureClass::Transient,
            GcalServiceError::Setup(_) => FailureClass::Terminal,
        }
    }
}

impl From<google_calendar3::Error> for GcalServiceError {
    fn from(err: google_calendar3::Error) -> Self {
        let status = match &err {
            google_calendar3::Error::BadRequest(value) => value["error"]["code"]
                .as_u64()
                .and_then(|code| u16::try_from(code).ok()),
            google_calendar3::Error::Failure(response) => Some(response.status().as_u16()),
            _ => None,
        };
        GcalServiceError::Api {
            status,
            message: err.to_string(),
        }
    }
}

impl From<TimedOut> for GcalServiceError {
    fn from(err: TimedOut) -> Self {
        GcalServiceError::Timeout(err.to_string())
    }
}

/// Picks the video entry point on the conferencing domain out of an event.
pub fn session_event_from(event: Event, conference_domain: &str) -> SessionEvent {
    let meeting_link = event
        .conference_data
        .as_ref()
        .and_then(|data| data.entry_points.as_ref())
        .and_then(|entry_points| {
            entry_points.iter().find_map(|entry| {
                let is_video = entry.entry_point_type.as_deref() == Some("video");
                match entry.uri.as_deref() {
                    Some(uri) if is_video && uri.contains(conference_domain) => {
                        Some(uri.to_string())
                    }
                    _ => None,
                }
            })
        });

    SessionEvent {
        event_id: event.id.unwrap_or_default(),
        status: event.status,
        html_link: event.html_link,
        meeting_link,
    }
}

fn event_from_request(request: SessionEventRequest) -> Event {
    Event {
        id: Some(request.event_id),
        summary: Some(request.summary),
        description: request.description,
        start: Some(EventDateTime {
            date_time: Some(request.start),
            time_zone: Some(request.time_zone.clone()),
            ..Default::default()
        }),
        end: Some(EventDateTime {
            date_time: Some(request.end),
            time_zone: Some(request.time_zone),
            ..Default::default()
        }),
        attendees: Some(
            request
                .attendees
                .into_iter()
                .map(|email| EventAttendee {
                    email: Some(email),
                    ..Default::default()
                })
                .collect(),
        ),
        conference_data: Some(ConferenceData {
            create_request: Some(CreateConferenceRequest {
                request_id: Some(request.conference_request_id),
                conference_solution_key: Some(ConferenceSolutionKey {
                    type_: Some("hangoutsMeet".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Google Calendar service implementation.
pub struct GoogleCalendarService {
    connector: Connector,
    conference_domain: String,
}

impl GoogleCalendarService {
    pub fn new(conference_domain: impl Into<String>) -> Result<Self, GcalServiceError> {
        let connector = build_connector().map_err(|e| GcalServiceError::Setup(e.to_string()))?;
        Ok(Self {
            connector,
            conference_domain: conference_domain.into(),
        })
    }
}

impl CalendarService for GoogleCalendarService {
    type Error = GcalServiceError;

    fn calendar_timezone(&self, access_token: &str) -> BoxFuture<'_, String, Self::Error> {
        let hub = hub_for_token(&self.connector, access_token);
        Box::pin(async move {
            let (_response, setting) = hub.settings().get("timezone").doit().await?;
            setting.value.ok_or_else(|| GcalServiceError::Api {
                status: None,
                message: "calendar settings returned no timezone".to_string(),
            })
        })
    }

    /// Busy periods for `calendar_id` between the two instants, sorted by start.
    fn get_busy_times(
        &self,
        access_token: &str,
        calendar_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> BoxFuture<'_, Vec<BusyInterval>, Self::Error> {
        let hub = hub_for_token(&self.connector, access_token);
        let calendar_id = calendar_id.to_string();

        Box::pin(async move {
            let req = FreeBusyRequest {
                time_min: Some(start_time),
                time_max: Some(end_time),
                time_zone: Some("UTC".to_string()),
                items: Some(vec![FreeBusyRequestItem {
                    id: Some(calendar_id.clone()),
                    ..Default::default()
                }]),
                ..Default::default()
            };

            let (_response, freebusy_response) = hub.freebusy().query(req).doit().await?;

            let mut busy_periods = Vec::new();
            if let Some(calendars) = freebusy_response.calendars {
                if let Some(cal_info) = calendars.get(&calendar_id) {
                    if let Some(errors) = cal_info.errors.as_ref().filter(|e| !e.is_empty()) {
                        // A calendar-level error means we cannot prove the window is free.
                        return Err(GcalServiceError::Api {
                            status: None,
                            message: format!("free/busy errors: {:?}", errors),
                        });
                    }
                    for period in cal_info.busy.iter().flatten() {
                        match (period.start, period.end) {
                            (Some(start), Some(end)) => busy_periods.push(BusyInterval { start, end }),
                            _ => info!(
                                "Skipping busy period with missing start/end: {:?}",
                                period
                            ),
                        }
                    }
                }
            }
            busy_periods.sort_by_key(|b| b.start);
            debug!(calendar_id = %calendar_id, "Found {} busy periods", busy_periods.len());
            Ok(busy_periods)
        })
    }

    fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: SessionEventRequest,
    ) -> BoxFuture<'_, SessionEvent, Self::Error> {
        let hub = hub_for_token(&self.connector, access_token);
        let calendar_id = calendar_id.to_string();

        Box::pin(async move {
            let (_response, created) = hub
                .events()
                .insert(event_from_request(event), &calendar_id)
                .conference_data_version(1)
                .send_updates("all")
                .doit()
                .await?;
            Ok(session_event_from(created, &self.conference_domain))
        })
    }

    fn get_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> BoxFuture<'_, Option<SessionEvent>, Self::Error> {
        let hub = hub_for_token(&self.connector, access_token);
        let calendar_id = calendar_id.to_string();
        let event_id = event_id.to_string();

        Box::pin(async move {
            match hub.events().get(&calendar_id, &event_id).doit().await {
                Ok((_response, event)) => Ok(Some(session_event_from(event, &self.conference_domain))),
                Err(e) => {
                    let err = GcalServiceError::from(e);
                    if err.is_not_found() {
                        Ok(None)
                    } else {
                        Err(err)
                    }
                }
            }
        })
    }

    fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> BoxFuture<'_, (), Self::Error> {
        let hub = hub_for_token(&self.connector, access_token);
        let calendar_id = calendar_id.to_string();
        let event_id = event_id.to_string();

        Box::pin(async move {
            match hub
                .events()
                .delete(&calendar_id, &event_id)
                .send_updates("all")
                .doit()
                .await
            {
                Ok(_) => Ok(()),
                Err(e) => {
                    let err = GcalServiceError::from(e);
                    // Already gone counts as deleted
                    if err.is_not_found() {
                        warn!(event_id = %event_id, "Calendar event already deleted");
                        Ok(())
                    } else {
                        Err(err)
                    }
                }
            }
        })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Which mock operation an injected failure applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockCalendarOp {
        Timezone,
        FreeBusy,
        Create,
        Get,
        Delete,
    }

    #[derive(Default)]
    struct MockCalendarState {
        time_zone: Option<String>,
        busy: Vec<BusyInterval>,
        events: HashMap<String, SessionEvent>,
        failures: VecDeque<(MockCalendarOp, GcalServiceError)>,
        omit_meeting_link: bool,
        create_calls: usize,
        delete_calls: usize,
        tokens_seen: Vec<String>,
    }

    /// In-memory calendar for tests.
    #[derive(Default)]
    pub struct MockCalendarService {
        state: Mutex<MockCalendarState>,
    }

    impl MockCalendarService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_time_zone(self, time_zone: &str) -> Self {
            self.lock().time_zone = Some(time_zone.to_string());
            self
        }

        pub fn add_busy(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
            self.lock().busy.push(BusyInterval { start, end });
        }

        /// The next call of `op` fails with an API error carrying `status`.
        pub fn fail_next(&self, op: MockCalendarOp, status: u16, message: &str) {
            self.lock().failures.push_back((
                op,
                GcalServiceError::Api {
                    status: Some(status),
                    message: message.to_string(),
                },
            ));
        }

        /// Created events come back without a conference entry point.
        pub fn omit_meeting_link(&self) {
            self.lock().omit_meeting_link = true;
        }

        pub fn insert_event(&self, event: SessionEvent) {
            self.lock().events.insert(event.event_id.clone(), event);
        }

        pub fn event(&self, event_id: &str) -> Option<SessionEvent> {
            self.lock().events.get(event_id).cloned()
        }

        pub fn event_count(&self) -> usize {
            self.lock().events.len()
        }

        pub fn create_calls(&self) -> usize {
            self.lock().create_calls
        }

        pub fn delete_calls(&self) -> usize {
            self.lock().delete_calls
        }

        pub fn tokens_seen(&self) -> Vec<String> {
            self.lock().tokens_seen.clone()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockCalendarState> {
            self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        fn take_failure(&self, op: MockCalendarOp, token: &str) -> Result<(), GcalServiceError> {
            let mut state = self.lock();
            state.tokens_seen.push(token.to_string());
            match state.failures.iter().position(|(o, _)| *o == op) {
                Some(idx) => match state.failures.remove(idx) {
                    Some((_, err)) => Err(err),
                    None => Ok(()),
                },
                None => Ok(()),
            }
        }
    }

    impl CalendarService for MockCalendarService {
        type Error = GcalServiceError;

        fn calendar_timezone(&self, access_token: &str) -> BoxFuture<'_, String, Self::Error> {
            let result = self
                .take_failure(MockCalendarOp::Timezone, access_token)
                .and_then(|_| {
                    self.lock().time_zone.clone().ok_or(GcalServiceError::Api {
                        status: Some(404),
                        message: "timezone setting not found".to_string(),
                    })
                });
            Box::pin(async move { result })
        }

        fn get_busy_times(
            &self,
            access_token: &str,
            _calendar_id: &str,
            start_time: DateTime<Utc>,
            end_time: DateTime<Utc>,
        ) -> BoxFuture<'_, Vec<BusyInterval>, Self::Error> {
            let result = self
                .take_failure(MockCalendarOp::FreeBusy, access_token)
                .map(|_| {
                    self.lock()
                        .busy
                        .iter()
                        .filter(|b| b.start < end_time && b.end > start_time)
                        .copied()
                        .collect()
                });
            Box::pin(async move { result })
        }

        fn create_event(
            &self,
            access_token: &str,
            _calendar_id: &str,
            event: SessionEventRequest,
        ) -> BoxFuture<'_, SessionEvent, Self::Error> {
            let result = self
                .take_failure(MockCalendarOp::Create, access_token)
                .and_then(|_| {
                    let mut state = self.lock();
                    state.create_calls += 1;
                    if state.events.contains_key(&event.event_id) {
                        return Err(GcalServiceError::Api {
                            status: Some(409),
                            message: "The requested identifier already exists.".to_string(),
                        });
                    }
                    let meeting_link = if state.omit_meeting_link {
                        None
                    } else {
                        Some(format!("https://meet.google.com/{}", event.conference_request_id))
                    };
                    let created = SessionEvent {
                        event_id: event.event_id.clone(),
                        status: Some("confirmed".to_string()),
                        html_link: Some(format!(
                            "https://www.google.com/calendar/event?eid={}",
                            event.event_id
                        )),
                        meeting_link,
                    };
                    state.events.insert(event.event_id, created.clone());
                    Ok(created)
                });
            Box::pin(async move { result })
        }

        fn get_event(
            &self,
            access_token: &str,
            _calendar_id: &str,
            event_id: &str,
        ) -> BoxFuture<'_, Option<SessionEvent>, Self::Error> {
            // Not-found reads as absent, like the real adapter
            let result = match self.take_failure(MockCalendarOp::Get, access_token) {
                Ok(()) => Ok(self.lock().events.get(event_id).cloned()),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            };
            Box::pin(async move { result })
        }

        fn delete_event(
            &self,
            access_token: &str,
            _calendar_id: &str,
            event_id: &str,
        ) -> BoxFuture<'_, (), Self::Error> {
            let result = self
                .take_failure(MockCalendarOp::Delete, access_token)
                .map(|_| {
                    let mut state = self.lock();
                    state.delete_calls += 1;
                    state.events.remove(event_id);
                });
            Box::pin(async move { result })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_calendar3::api::EntryPoint;

    fn api(status: u16, message: &str) -> GcalServiceError {
        GcalServiceError::Api {
            status: Some(status),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(api(401, "Invalid Credentials").classify(), FailureClass::Terminal);
        assert_eq!(api(403, "insufficientPermissions").classify(), FailureClass::Terminal);
        assert_eq!(api(403, "rateLimitExceeded").classify(), FailureClass::Transient);
        assert_eq!(api(429, "Too Many Requests").classify(), FailureClass::Transient);
        assert_eq!(api(503, "backendError").classify(), FailureClass::Transient);
        assert_eq!(api(409, "duplicate").classify(), FailureClass::Validation);
        assert_eq!(
            GcalServiceError::Timeout("15s".into()).classify(),
            FailureClass::Transient
        );
        assert!(api(410, "gone").is_not_found());
    }

    #[test]
    fn test_meeting_link_matches_video_entry_on_domain() {
        let event = Event {
            id: Some("cmabc".to_string()),
            conference_data: Some(ConferenceData {
                entry_points: Some(vec![
                    EntryPoint {
                        entry_point_type: Some("phone".to_string()),
                        uri: Some("tel:+1-555-0100".to_string()),
                        ..Default::default()
                    },
                    EntryPoint {
                        entry_point_type: Some("video".to_string()),
                        uri: Some("https://other.example.com/room".to_string()),
                        ..Default::default()
                    },
                    EntryPoint {
                        entry_point_type: Some("video".to_string()),
                        uri: Some("https://meet.google.com/abc-defg-hij".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let session_event = session_event_from(event, "meet.google.com");
        assert_eq!(session_event.event_id, "cmabc");
        assert_eq!(
            session_event.meeting_link.as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
    }

    #[test]
    fn test_missing_conference_data_yields_no_link() {
        let session_event = session_event_from(Event::default(), "meet.google.com");
        assert!(session_event.meeting_link.is_none());
    }

    #[test]
    fn test_event_from_request_sets_conference_request() {
        let start = Utc::now();
        let event = event_from_request(SessionEventRequest {
            event_id: "cm123".into(),
            conference_request_id: "carematch-123".into(),
            summary: "Therapy session".into(),
            description: None,
            start,
            end: start + chrono::Duration::hours(1),
            time_zone: "America/Chicago".into(),
            attendees: vec!["client@example.com".into(), "ther@example.com".into()],
        });
        assert_eq!(event.id.as_deref(), Some("cm123"));
        assert_eq!(event.attendees.as_ref().map(Vec::len), Some(2));
        let request_id = event
            .conference_data
            .and_then(|c| c.create_request)
            .and_then(|r| r.request_id);
        assert_eq!(request_id.as_deref(), Some("carematch-123"));
    }
}
