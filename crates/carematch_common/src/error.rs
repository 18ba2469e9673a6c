// --- File: crates/carematch_common/src/error.rs ---
use std::fmt;
use thiserror::Error;

/// The shared error type for the booking engine.
///
/// Each crate keeps its own error enum and converts into this one with `From`.
#[derive(Error, Debug)]
pub enum CareMatchError {
    /// Malformed input, rejected before any external call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Calendar conflict or internal double-booking.
    #[error("Slot unavailable: {0}")]
    SlotUnavailable(String),

    /// Terminal OAuth failure; the therapist must re-authorize.
    #[error("Calendar authorization expired for therapist {therapist_id}")]
    AuthExpired { therapist_id: String },

    /// Network or rate-limit failure; the whole operation may be retried.
    #[error("External service error: {service} - {message}")]
    ExternalServiceTransient { service: String, message: String },

    /// Payer or payee is not eligible for a charge.
    #[error("Payment setup error: {0}")]
    PaymentSetup(String),

    /// A persisted record contradicts its own totals.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Retry decision for a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Will not succeed on retry without outside action (re-authorization, support).
    Terminal,
    /// Safe to retry the whole operation.
    Transient,
    /// The request itself is wrong.
    Validation,
}

/// Classifies an error into a [`FailureClass`].
pub trait Classify {
    fn classify(&self) -> FailureClass;

    fn is_transient(&self) -> bool {
        self.classify() == FailureClass::Transient
    }

    fn is_terminal(&self) -> bool {
        self.classify() == FailureClass::Terminal
    }
}

impl Classify for CareMatchError {
    fn classify(&self) -> FailureClass {
        match self {
            CareMatchError::ExternalServiceTransient { .. } => FailureClass::Transient,
            CareMatchError::Validation(_)
            | CareMatchError::SlotUnavailable(_)
            | CareMatchError::PaymentSetup(_)
            | CareMatchError::NotFound(_)
            | CareMatchError::Forbidden(_)
            | CareMatchError::InvalidTransition { .. } => FailureClass::Validation,
            CareMatchError::AuthExpired { .. }
            | CareMatchError::InconsistentState(_)
            | CareMatchError::Database(_)
            | CareMatchError::Config(_)
            | CareMatchError::Internal(_) => FailureClass::Terminal,
        }
    }
}

/// A trait for converting errors to HTTP status codes.
pub trait HttpStatusCode {
    /// Returns the HTTP status code for this error.
    fn status_code(&self) -> u16;
}

impl HttpStatusCode for CareMatchError {
    fn status_code(&self) -> u16 {
        match self {
            CareMatchError::Validation(_) => 400,
            CareMatchError::SlotUnavailable(_) => 409,
            CareMatchError::AuthExpired { .. } => 424,
            CareMatchError::ExternalServiceTransient { .. } => 503,
            CareMatchError::PaymentSetup(_) => 402,
            CareMatchError::InconsistentState(_) => 500,
            CareMatchError::NotFound(_) => 404,
            CareMatchError::Forbidden(_) => 403,
            CareMatchError::InvalidTransition { .. } => 409,
            CareMatchError::Database(_) => 500,
            CareMatchError::Config(_) => 500,
            CareMatchError::Internal(_) => 500,
        }
    }
}

impl CareMatchError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            CareMatchError::Validation(_) => "validation_error",
            CareMatchError::SlotUnavailable(_) => "slot_unavailable",
            CareMatchError::AuthExpired { .. } => "auth_expired",
            CareMatchError::ExternalServiceTransient { .. } => "external_service_transient",
            CareMatchError::PaymentSetup(_) => "payment_setup_error",
            CareMatchError::InconsistentState(_) => "inconsistent_state",
            CareMatchError::NotFound(_) => "not_found",
            CareMatchError::Forbidden(_) => "forbidden",
            CareMatchError::InvalidTransition { .. } => "invalid_transition",
            CareMatchError::Database(_) => "database_error",
            CareMatchError::Config(_) => "config_error",
            CareMatchError::Internal(_) => "internal_error",
        }
    }

    /// Text safe to show to the caller. Internal details never leak.
    pub fn user_message(&self) -> String {
        match self {
            CareMatchError::Validation(msg) => msg.clone(),
            CareMatchError::SlotUnavailable(_) => {
                "This time is no longer available. Please choose another slot.".to_string()
            }
            CareMatchError::AuthExpired { .. } => {
                "The therapist's calendar connection has expired. Please reconnect your calendar."
                    .to_string()
            }
            CareMatchError::PaymentSetup(msg) => format!("Payment could not be set up: {}", msg),
            CareMatchError::NotFound(_)
            | CareMatchError::Forbidden(_)
            | CareMatchError::InvalidTransition { .. } => self.to_string(),
            CareMatchError::ExternalServiceTransient { .. }
            | CareMatchError::InconsistentState(_)
            | CareMatchError::Database(_)
            | CareMatchError::Config(_)
            | CareMatchError::Internal(_) => {
                "Something went wrong on our side. Please try again later.".to_string()
            }
        }
    }
}

/// A trait for adding context to errors.
pub trait Context<T, E> {
    /// Adds context to an error.
    fn context<C>(self, context: C) -> Result<T, CareMatchError>
    where
        C: fmt::Display + Send + Sync + 'static;

    /// Adds context to an error with a lazy context provider.
    fn with_context<C, F>(self, f: F) -> Result<T, CareMatchError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E: std::error::Error + Send + Sync + 'static> Context<T, E> for Result<T, E> {
    fn context<C>(self, context: C) -> Result<T, CareMatchError>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|error| CareMatchError::Internal(format!("{}: {}", context, error)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, CareMatchError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| CareMatchError::Internal(format!("{}: {}", f(), error)))
    }
}

impl From<reqwest::Error> for CareMatchError {
    fn from(err: reqwest::Error) -> Self {
        CareMatchError::ExternalServiceTransient {
            service: "http".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CareMatchError {
    fn from(err: serde_json::Error) -> Self {
        CareMatchError::Internal(format!("serialization failed: {}", err))
    }
}

// Utility functions for error handling
pub fn validation_error<T: fmt::Display>(message: T) -> CareMatchError {
    CareMatchError::Validation(message.to_string())
}

pub fn not_found<T: fmt::Display>(message: T) -> CareMatchError {
    CareMatchError::NotFound(message.to_string())
}

pub fn slot_unavailable<T: fmt::Display>(message: T) -> CareMatchError {
    CareMatchError::SlotUnavailable(message.to_string())
}

pub fn transient<T: fmt::Display>(service: &str, message: T) -> CareMatchError {
    CareMatchError::ExternalServiceTransient {
        service: service.to_string(),
        message: message.to_string(),
    }
}

pub fn internal_error<T: fmt::Display>(message: T) -> CareMatchError {
    CareMatchError::Internal(message.to_string())
}
