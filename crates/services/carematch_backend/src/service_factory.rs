// --- File: crates/services/carematch_backend/src/service_factory.rs ---
//! Builds the production collaborators and the booking engine from configuration.

use std::sync::Arc;
use std::time::Duration;

use carematch_booking::{BookingEngine, BookingState, Collaborators, ConfiguredNotifier};
use carematch_common::CareMatchError;
use carematch_config::{AppConfig, GcalConfig, StripeConfig};
use carematch_db::{DbClient, SqlCalendarCredentialRepository, SqlSessionPaymentRepository};
use carematch_gcal::{
    GoogleCalendarService, GoogleOAuthClient, OAuthSettings, SlotCoordinator,
    TokenLifecycleManager,
};
use carematch_stripe::{SettlementOrchestrator, StripePaymentService, StripeState};
use tracing::info;

/// Google Calendar, Google OAuth, Stripe and the configured notifier.
pub struct ProductionCollaborators;

impl Collaborators for ProductionCollaborators {
    type Calendar = GoogleCalendarService;
    type Tokens = GoogleOAuthClient;
    type Payments = StripePaymentService;
    type Notifier = ConfiguredNotifier;
}

/// Returns the section when its runtime flag is on and the section is present.
pub fn enabled_section<'a, T>(
    name: &str,
    flag: bool,
    section: Option<&'a T>,
) -> Result<&'a T, CareMatchError> {
    match (flag, section) {
        (true, Some(section)) => Ok(section),
        (false, _) => Err(CareMatchError::Config(format!(
            "booking requires use_{} = true",
            name
        ))),
        (true, None) => Err(CareMatchError::Config(format!(
            "use_{} is set but the [{}] section is missing",
            name, name
        ))),
    }
}

/// Handler states for the routers mounted by the backend.
pub struct CareMatchServiceFactory {
    pub booking: Arc<BookingState<ProductionCollaborators>>,
    pub stripe: Arc<StripeState<StripePaymentService>>,
}

impl CareMatchServiceFactory {
    pub fn new(config: &AppConfig, db: DbClient) -> Result<Self, CareMatchError> {
        let gcal: &GcalConfig = enabled_section("gcal", config.use_gcal, config.gcal.as_ref())?;
        let stripe: &StripeConfig =
            enabled_section("stripe", config.use_stripe, config.stripe.as_ref())?;
        let call_timeout = Duration::from_secs(config.booking.external_call_timeout_secs());

        info!("ℹ️ Initializing Google Calendar service...");
        let calendar = GoogleCalendarService::new(gcal.conference_domain())
            .map_err(|e| CareMatchError::Config(format!("calendar client: {}", e)))?;
        let tokens = TokenLifecycleManager::new(
            Arc::new(GoogleOAuthClient::new(OAuthSettings::from(gcal))),
            SqlCalendarCredentialRepository::new(db.clone()),
            gcal,
            call_timeout,
        );
        let slots = SlotCoordinator::new(
            Arc::new(calendar),
            Arc::new(tokens),
            gcal.default_time_zone(),
            call_timeout,
        );

        info!("ℹ️ Initializing Stripe payment service...");
        let payments = StripePaymentService::from_config(stripe)?;
        let orchestrator = Arc::new(SettlementOrchestrator::from_config(
            Arc::new(payments),
            SqlSessionPaymentRepository::new(db.clone()),
            stripe,
            call_timeout,
        ));

        let notifier = ConfiguredNotifier::from_config(config);
        let engine = BookingEngine::new(
            db,
            Arc::new(slots),
            orchestrator.clone(),
            Arc::new(notifier),
            &config.booking,
        );

        Ok(Self {
            booking: Arc::new(BookingState {
                engine: Arc::new(engine),
            }),
            stripe: Arc::new(StripeState {
                orchestrator,
                webhook_secret: stripe.webhook_secret.clone(),
            }),
        })
    }
}
