// --- File: crates/carematch_common/src/models.rs ---

// Domain records shared by the db, calendar, subsidy, payment and booking crates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CareMatchError;

/// Lifecycle state of a booking.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Rescheduled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rescheduled => "rescheduled",
            BookingStatus::Completed => "completed",
        }
    }

    /// `cancelled` and `completed` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Only these states may carry an external calendar event id.
    pub fn allows_calendar_event(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Completed)
    }

    /// Whether a booking in this state occupies its time window.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Rescheduled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, Rescheduled)
                | (Rescheduled, Confirmed)
                | (Rescheduled, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = CareMatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "rescheduled" => Ok(BookingStatus::Rescheduled),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(CareMatchError::Validation(format!(
                "unknown booking status '{}'",
                other
            ))),
        }
    }
}

/// Free-form booking metadata persisted as JSON.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingMetadata {
    #[serde(default)]
    pub client_time_zone: Option<String>,
    #[serde(default)]
    pub therapist_time_zone: Option<String>,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub calendar_html_link: Option<String>,
    /// Who created the booking: `client` or `therapist`.
    #[serde(default)]
    pub initiated_by: Option<String>,
    /// Event ids removed from the external calendar on cancellation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_calendar_event_ids: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One scheduled therapy appointment.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingSession {
    pub id: String,
    pub client_id: String,
    pub therapist_id: String,
    /// Calendar date of the session in the therapist's timezone.
    pub session_date: NaiveDate,
    pub session_start_time: DateTime<Utc>,
    pub session_end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub external_calendar_event_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub sponsoring_group_id: Option<String>,
    pub total_cost_cents: i64,
    pub group_subsidy_cents: i64,
    pub direct_subsidy_cents: i64,
    pub percentage_subsidy_cents: i64,
    pub out_of_pocket_cents: i64,
    pub metadata: BookingMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingSession {
    pub fn subsidy_used_cents(&self) -> i64 {
        self.group_subsidy_cents + self.direct_subsidy_cents + self.percentage_subsidy_cents
    }

    /// Half-open interval overlap: touching boundaries do not overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        intervals_overlap(self.session_start_time, self.session_end_time, start, end)
    }
}

/// True when `[new_start, new_end)` collides with `[existing_start, existing_end)`.
///
/// Covers a new session starting during, ending during, or fully containing the
/// existing one.
pub fn intervals_overlap(
    existing_start: DateTime<Utc>,
    existing_end: DateTime<Utc>,
    new_start: DateTime<Utc>,
    new_end: DateTime<Utc>,
) -> bool {
    let starts_during = new_start >= existing_start && new_start < existing_end;
    let ends_during = new_end > existing_start && new_end <= existing_end;
    let contains = new_start <= existing_start && new_end >= existing_end;
    starts_during || ends_during || contains
}

/// Settlement state of a [`SessionPayment`].
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CareMatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(CareMatchError::Validation(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// Prefix of payment references that stand for a fully subsidized session.
pub const SYNTHETIC_PAYMENT_PREFIX: &str = "subsidy_";

/// Monetary settlement for one booking (1:1).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayment {
    pub booking_session_id: String,
    pub total_amount_cents: i64,
    pub subsidy_used_cents: i64,
    pub out_of_pocket_cents: i64,
    pub platform_fee_cents: i64,
    pub currency: String,
    pub external_payment_reference: String,
    pub status: PaymentStatus,
    pub charged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SessionPayment {
    pub fn is_synthetic(&self) -> bool {
        self.external_payment_reference
            .starts_with(SYNTHETIC_PAYMENT_PREFIX)
    }

    /// `total == subsidy + out_of_pocket`, with no negative parts.
    pub fn is_balanced(&self) -> bool {
        self.subsidy_used_cents >= 0
            && self.out_of_pocket_cents >= 0
            && self.total_amount_cents == self.subsidy_used_cents + self.out_of_pocket_cents
    }
}

/// Connection state of a therapist's external calendar.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    NotConnected,
    Connected,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::NotConnected => "not_connected",
            IntegrationStatus::Connected => "connected",
        }
    }

    /// Unknown values read as disconnected.
    pub fn parse(s: &str) -> Self {
        match s {
            "connected" => IntegrationStatus::Connected,
            _ => IntegrationStatus::NotConnected,
        }
    }
}

/// Per-therapist OAuth state for the external calendar.
#[derive(Clone, PartialEq)]
pub struct CalendarCredential {
    pub therapist_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub integration_status: IntegrationStatus,
    pub calendar_email: Option<String>,
}

impl CalendarCredential {
    pub fn disconnected(therapist_id: impl Into<String>) -> Self {
        Self {
            therapist_id: therapist_id.into(),
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            integration_status: IntegrationStatus::NotConnected,
            calendar_email: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.integration_status == IntegrationStatus::Connected
    }
}

// Tokens stay out of logs.
impl fmt::Debug for CalendarCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarCredential")
            .field("therapist_id", &self.therapist_id)
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_expires_at", &self.token_expires_at)
            .field("integration_status", &self.integration_status)
            .field("calendar_email", &self.calendar_email)
            .finish()
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub employer_id: Option<String>,
    /// Payment processor customer id.
    pub payment_customer_id: Option<String>,
    pub time_zone: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapistProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub session_rate_cents: i64,
    /// Connected payout account that receives the transfer.
    pub payout_account_id: Option<String>,
    pub time_zone: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employer {
    pub id: String,
    pub name: String,
    pub allows_sponsored_groups: bool,
    pub default_subsidy_percent: Option<i64>,
}

/// A group the client belongs to, with the group's shared credit pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCreditPool {
    pub group_id: String,
    pub employer_id: String,
    pub name: String,
    pub remaining_credits: i64,
}

/// A dollar-denominated grant for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectSubsidyGrant {
    pub id: String,
    pub client_id: String,
    pub employer_id: Option<String>,
    pub remaining_cents: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DirectSubsidyGrant {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.remaining_cents > 0 && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Cents drawn from one direct grant.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDraw {
    pub subsidy_id: String,
    pub cents: i64,
}

/// Result of the subsidy waterfall for one session cost.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubsidyBreakdown {
    pub total_cost_cents: i64,
    pub group_cents: i64,
    /// Group credited by the first tier, if any.
    pub group_id: Option<String>,
    pub direct_cents: i64,
    pub direct_draws: Vec<DirectDraw>,
    pub percentage_cents: i64,
    pub subsidy_used_cents: i64,
    pub out_of_pocket_cents: i64,
}

impl SubsidyBreakdown {
    /// Breakdown for a user with no subsidy source at all.
    pub fn unsubsidized(total_cost_cents: i64) -> Self {
        Self {
            total_cost_cents,
            out_of_pocket_cents: total_cost_cents,
            ..Default::default()
        }
    }

    pub fn is_conserved(&self) -> bool {
        self.subsidy_used_cents == self.group_cents + self.direct_cents + self.percentage_cents
            && self.subsidy_used_cents + self.out_of_pocket_cents == self.total_cost_cents
    }
}

/// Caller role as resolved by the identity provider.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Therapist,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Therapist => "therapist",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = CareMatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "therapist" => Ok(Role::Therapist),
            "admin" => Ok(Role::Admin),
            other => Err(CareMatchError::Forbidden(format!("unknown role '{}'", other))),
        }
    }
}
