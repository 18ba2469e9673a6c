// --- File: crates/carematch_stripe/src/error.rs ---
use carematch_common::{CareMatchError, Classify, FailureClass, HttpStatusCode, TimedOut};
use carematch_db::DbError;
use thiserror::Error;

/// Stripe-specific error types.
#[derive(Error, Debug)]
pub enum StripeError {
    /// Error occurred during a Stripe API request
    #[error("Stripe API request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    /// Error returned by the Stripe API
    #[error("Stripe API returned an error: {message} (Status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
        code: Option<String>,
    },

    /// Error parsing Stripe API response
    #[error("Failed to parse Stripe API response: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Stripe call timed out: {0}")]
    Timeout(String),

    /// Missing or incomplete Stripe configuration
    #[error("Stripe configuration missing or incomplete")]
    ConfigError,

    /// Payer or payee cannot take part in a charge
    #[error("Payment setup error: {0}")]
    PaymentSetup(String),

    /// A payment record contradicts its own totals
    #[error("Inconsistent payment state: {0}")]
    InconsistentState(String),

    #[error("Payment cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Payment not found: {0}")]
    NotFound(String),

    /// Webhook signature verification failed
    #[error("Stripe webhook signature verification failed: {0}")]
    WebhookSignatureError(String),

    /// Webhook event processing error
    #[error("Stripe webhook event processing error: {0}")]
    WebhookProcessingError(String),

    #[error("Payment ledger error: {0}")]
    Db(#[from] DbError),
}

impl StripeError {
    /// The payer or payee cannot take part in a charge, as opposed to the processor
    /// being unreachable.
    pub fn is_payment_setup(&self) -> bool {
        matches!(
            self,
            StripeError::PaymentSetup(_)
                | StripeError::ApiError {
                    status_code: 400 | 402,
                    ..
                }
        )
    }
}

impl From<TimedOut> for StripeError {
    fn from(err: TimedOut) -> Self {
        StripeError::Timeout(err.to_string())
    }
}

impl Classify for StripeError {
    fn classify(&self) -> FailureClass {
        match self {
            StripeError::RequestError(_) | StripeError::Timeout(_) => FailureClass::Transient,
            StripeError::ApiError { status_code, .. } => match status_code {
                429 | 500..=599 => FailureClass::Transient,
                401 | 403 => FailureClass::Terminal,
                _ => FailureClass::Validation,
            },
            StripeError::PaymentSetup(_)
            | StripeError::InvalidTransition { .. }
            | StripeError::NotFound(_)
            | StripeError::WebhookSignatureError(_)
            | StripeError::WebhookProcessingError(_) => FailureClass::Validation,
            StripeError::ParseError(_)
            | StripeError::ConfigError
            | StripeError::InconsistentState(_)
            | StripeError::Db(_) => FailureClass::Terminal,
        }
    }
}

/// Convert StripeError to CareMatchError
impl From<StripeError> for CareMatchError {
    fn from(err: StripeError) -> Self {
        if err.is_transient() {
            return CareMatchError::ExternalServiceTransient {
                service: "stripe".to_string(),
                message: err.to_string(),
            };
        }
        match err {
            StripeError::ApiError {
                status_code: 400 | 402,
                message,
                ..
            } => CareMatchError::PaymentSetup(message),
            StripeError::ApiError {
                status_code,
                message,
                ..
            } => CareMatchError::Internal(format!("Stripe API {}: {}", status_code, message)),
            StripeError::ParseError(e) => {
                CareMatchError::Internal(format!("Stripe response parse error: {}", e))
            }
            StripeError::ConfigError => CareMatchError::Config(
                "Stripe configuration missing or incomplete".to_string(),
            ),
            StripeError::PaymentSetup(msg) => CareMatchError::PaymentSetup(msg),
            StripeError::InconsistentState(msg) => CareMatchError::InconsistentState(msg),
            StripeError::InvalidTransition { from, to } => {
                CareMatchError::InvalidTransition { from, to }
            }
            StripeError::NotFound(msg) => CareMatchError::NotFound(msg),
            StripeError::WebhookSignatureError(msg) => {
                CareMatchError::Validation(format!("Invalid webhook signature: {}", msg))
            }
            StripeError::WebhookProcessingError(msg) => CareMatchError::Validation(msg),
            StripeError::Db(e) => e.into(),
            StripeError::RequestError(e) => CareMatchError::ExternalServiceTransient {
                service: "stripe".to_string(),
                message: e.to_string(),
            },
            StripeError::Timeout(msg) => CareMatchError::ExternalServiceTransient {
                service: "stripe".to_string(),
                message: msg,
            },
        }
    }
}

/// Implement HttpStatusCode for StripeError to provide a consistent way to convert
/// StripeError to HTTP status codes.
impl HttpStatusCode for StripeError {
    fn status_code(&self) -> u16 {
        match self {
            StripeError::RequestError(_) | StripeError::Timeout(_) => 503,
            StripeError::ApiError { status_code, .. } => match status_code {
                429 | 500..=599 => 503,
                400 | 402 => 402,
                _ => 502,
            },
            StripeError::ParseError(_) => 502,
            StripeError::ConfigError => 500,
            StripeError::PaymentSetup(_) => 402,
            StripeError::InconsistentState(_) => 500,
            StripeError::InvalidTransition { .. } => 409,
            StripeError::NotFound(_) => 404,
            StripeError::WebhookSignatureError(_) => 400,
            StripeError::WebhookProcessingError(_) => 400,
            StripeError::Db(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status_code: u16) -> StripeError {
        StripeError::ApiError {
            status_code,
            message: "boom".into(),
            code: None,
        }
    }

    #[test]
    fn test_classification() {
        assert!(api(429).is_transient());
        assert!(api(502).is_transient());
        assert!(api(401).is_terminal());
        assert_eq!(api(402).classify(), FailureClass::Validation);
        assert!(StripeError::Timeout("15s".into()).is_transient());
    }

    #[test]
    fn test_card_decline_is_payment_setup() {
        let err: CareMatchError = api(402).into();
        assert_eq!(err.kind(), "payment_setup_error");
        let err: CareMatchError = api(503).into();
        assert_eq!(err.kind(), "external_service_transient");
    }
}
