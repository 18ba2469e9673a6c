use carematch_common::{CareMatchError, Classify, FailureClass, TimedOut};
use thiserror::Error;

use crate::tokens::TokenError;

/// Errors raised by the slot coordinator.
#[derive(Debug, Error)]
pub enum GcalError {
    #[error("Invalid session time: {0}")]
    InvalidTime(String),

    #[error("Slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("Calendar authorization expired for therapist {therapist_id}")]
    AuthExpired { therapist_id: String },

    /// A calendar API failure, already classified by the service adapter.
    #[error("Calendar error ({class:?}): {message}")]
    Calendar { class: FailureClass, message: String },

    #[error("Calendar event {event_id} has no meeting link")]
    MissingMeetingLink { event_id: String },

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl GcalError {
    pub fn calendar<E: std::error::Error + Classify>(err: &E) -> Self {
        GcalError::Calendar {
            class: err.classify(),
            message: err.to_string(),
        }
    }
}

impl From<TimedOut> for GcalError {
    fn from(err: TimedOut) -> Self {
        GcalError::Calendar {
            class: FailureClass::Transient,
            message: err.to_string(),
        }
    }
}

impl Classify for GcalError {
    fn classify(&self) -> FailureClass {
        match self {
            GcalError::InvalidTime(_) | GcalError::SlotUnavailable(_) => FailureClass::Validation,
            GcalError::AuthExpired { .. } => FailureClass::Terminal,
            GcalError::Calendar { class, .. } => *class,
            GcalError::MissingMeetingLink { .. } => FailureClass::Transient,
            GcalError::Token(e) => e.classify(),
        }
    }
}

impl From<GcalError> for CareMatchError {
    fn from(err: GcalError) -> Self {
        match err {
            GcalError::InvalidTime(msg) => CareMatchError::Validation(msg),
            GcalError::SlotUnavailable(msg) => CareMatchError::SlotUnavailable(msg),
            GcalError::AuthExpired { therapist_id } => CareMatchError::AuthExpired { therapist_id },
            GcalError::Calendar { class, message } => match class {
                FailureClass::Transient => CareMatchError::ExternalServiceTransient {
                    service: "gcal".to_string(),
                    message,
                },
                FailureClass::Validation => CareMatchError::Validation(message),
                FailureClass::Terminal => {
                    CareMatchError::Internal(format!("calendar rejected request: {}", message))
                }
            },
            GcalError::MissingMeetingLink { event_id } => CareMatchError::ExternalServiceTransient {
                service: "gcal".to_string(),
                message: format!("event {} returned without a meeting link", event_id),
            },
            GcalError::Token(e) => e.into(),
        }
    }
}
