// --- File: crates/carematch_config/src/models.rs ---

use serde::{Deserialize, Serialize};

// --- General Server Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

// --- Database Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String, // e.g. sqlite://data/carematch.db, loaded via CAREMATCH__DATABASE__URL
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

// --- Google Calendar Config ---
// OAuth client for therapist calendar integrations. Secrets use the "secret_from_env" marker:
// GCAL_CLIENT_SECRET, GCAL_OAUTH_STATE_SECRET
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GcalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Used when the therapist's calendar settings cannot be read.
    #[serde(default)]
    pub default_time_zone: Option<String>,
    /// Refresh access tokens expiring within this many seconds.
    #[serde(default)]
    pub refresh_threshold_secs: Option<i64>,
    #[serde(default)]
    pub conference_domain: Option<String>,
    pub oauth_state_secret: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub tokeninfo_endpoint: Option<String>,
}

impl GcalConfig {
    pub const DEFAULT_TIME_ZONE: &'static str = "America/New_York";
    pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 300;
    pub const DEFAULT_CONFERENCE_DOMAIN: &'static str = "meet.google.com";

    pub fn default_time_zone(&self) -> &str {
        self.default_time_zone
            .as_deref()
            .unwrap_or(Self::DEFAULT_TIME_ZONE)
    }

    pub fn refresh_threshold_secs(&self) -> i64 {
        self.refresh_threshold_secs
            .unwrap_or(Self::DEFAULT_REFRESH_THRESHOLD_SECS)
    }

    pub fn conference_domain(&self) -> &str {
        self.conference_domain
            .as_deref()
            .unwrap_or(Self::DEFAULT_CONFERENCE_DOMAIN)
    }

    pub fn authorization_endpoint(&self) -> &str {
        self.authorization_endpoint
            .as_deref()
            .unwrap_or("https://accounts.google.com/o/oauth2/v2/auth")
    }

    pub fn token_endpoint(&self) -> &str {
        self.token_endpoint
            .as_deref()
            .unwrap_or("https://oauth2.googleapis.com/token")
    }

    pub fn tokeninfo_endpoint(&self) -> &str {
        self.tokeninfo_endpoint
            .as_deref()
            .unwrap_or("https://oauth2.googleapis.com/tokeninfo")
    }
}

// --- Stripe Config ---
// Secret key and webhook secret use the "secret_from_env" marker:
// STRIPE_SECRET_KEY, STRIPE_WEBHOOK_SECRET
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Share of the total session cost retained by the platform, in percent.
    #[serde(default)]
    pub platform_fee_percent: Option<i64>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl StripeConfig {
    pub const DEFAULT_PLATFORM_FEE_PERCENT: i64 = 10;

    pub fn currency(&self) -> &str {
        self.currency.as_deref().unwrap_or("usd")
    }

    pub fn platform_fee_percent(&self) -> i64 {
        self.platform_fee_percent
            .unwrap_or(Self::DEFAULT_PLATFORM_FEE_PERCENT)
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or("https://api.stripe.com/v1")
    }
}

// --- Booking Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BookingConfig {
    /// Upper bound applied to every external call (calendar, payment, token refresh).
    #[serde(default)]
    pub external_call_timeout_secs: Option<u64>,
    /// Keep the booking as `pending` when the held charge cannot be set up.
    #[serde(default)]
    pub persist_pending_on_payment_failure: bool,
    /// Flat value of one sponsored-group credit. Unset means one credit covers a whole session.
    #[serde(default)]
    pub group_credit_value_cents: Option<i64>,
}

impl BookingConfig {
    pub const DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS: u64 = 15;

    pub fn external_call_timeout_secs(&self) -> u64 {
        self.external_call_timeout_secs
            .unwrap_or(Self::DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS)
    }
}

// --- Notification Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NotificationConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>, // NOTIFICATIONS_API_KEY via "secret_from_env"
}

// --- Unified App Configuration ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    // Server config is mandatory
    pub server: ServerConfig,

    // --- Runtime Flags (optional in config file, default to false) ---
    #[serde(default)]
    pub use_gcal: bool,
    #[serde(default)]
    pub use_stripe: bool,
    #[serde(default)]
    pub use_notifications: bool,

    // --- Optional Feature Configurations ---
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub gcal: Option<GcalConfig>,
    #[serde(default)]
    pub stripe: Option<StripeConfig>,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,
}
