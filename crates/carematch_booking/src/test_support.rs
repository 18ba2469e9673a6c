//! Fixtures for the engine and router tests: a throwaway SQLite database seeded with an
//! employer, a few clients and a connected therapist, wired to in-memory collaborators.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use carematch_common::models::{
    ClientProfile, DirectSubsidyGrant, Employer, GroupCreditPool, Role, TherapistProfile,
};
use carematch_config::{BookingConfig, GcalConfig};
use carematch_db::{
    DbClient, SqlBookingSessionRepository, SqlCalendarCredentialRepository,
    SqlDirectoryRepository, SqlSessionPaymentRepository, SqlSubsidyLedgerRepository,
};
use carematch_gcal::oauth::mock::MockTokenEndpoint;
use carematch_gcal::service::mock::MockCalendarService;
use carematch_gcal::{SlotCoordinator, TokenLifecycleManager};
use carematch_stripe::service::mock::MockPaymentService;
use carematch_stripe::SettlementOrchestrator;
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use tempfile::TempDir;

use crate::auth::CallerIdentity;
use crate::logic::{BookingEngine, ClientBookingRequest, Collaborators};
use crate::notify::mock::RecordingNotifier;

pub const THERAPIST: &str = "ther-1";
/// Seeded therapist whose calendar was never connected.
pub const DISCONNECTED_THERAPIST: &str = "ther-2";
/// No employer, card on file.
pub const PLAIN_CLIENT: &str = "client-plain";
/// Employer-sponsored, with a $50 direct grant.
pub const GRANT_CLIENT: &str = "client-grant";
/// Member of a sponsored group with three credits.
pub const GROUP_CLIENT: &str = "client-group";
/// No payment method on file.
pub const NO_CARD_CLIENT: &str = "client-nocard";

pub const GRANT_ID: &str = "grant-1";
pub const GROUP_ID: &str = "group-1";

pub struct TestCollaborators;

impl Collaborators for TestCollaborators {
    type Calendar = MockCalendarService;
    type Tokens = MockTokenEndpoint;
    type Payments = MockPaymentService;
    type Notifier = RecordingNotifier;
}

pub struct Harness {
    _dir: TempDir,
    pub bookings: SqlBookingSessionRepository,
    pub ledger: SqlSubsidyLedgerRepository,
    pub payments_repo: SqlSessionPaymentRepository,
    pub calendar: Arc<MockCalendarService>,
    pub endpoint: Arc<MockTokenEndpoint>,
    pub payments: Arc<MockPaymentService>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<BookingEngine<TestCollaborators>>,
}

pub fn gcal_config() -> GcalConfig {
    GcalConfig {
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        redirect_uri: "https://app.example.com/api/calendar/oauth/callback".into(),
        default_time_zone: None,
        refresh_threshold_secs: None,
        conference_domain: None,
        oauth_state_secret: "state-secret".into(),
        authorization_endpoint: None,
        token_endpoint: None,
        tokeninfo_endpoint: None,
    }
}

fn client(id: &str, employer_id: Option<&str>, customer: Option<&str>) -> ClientProfile {
    ClientProfile {
        id: id.into(),
        email: format!("{}@example.com", id),
        full_name: format!("Client {}", id),
        employer_id: employer_id.map(String::from),
        payment_customer_id: customer.map(String::from),
        time_zone: Some("America/Chicago".into()),
    }
}

fn therapist(id: &str) -> TherapistProfile {
    TherapistProfile {
        id: id.into(),
        email: format!("{}@example.com", id),
        full_name: "Taylor Therapist".into(),
        session_rate_cents: 15000,
        payout_account_id: Some("acct_1".into()),
        time_zone: Some("America/New_York".into()),
    }
}

pub async fn harness() -> Harness {
    harness_with(BookingConfig::default()).await
}

pub async fn harness_with(config: BookingConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("booking.db").display());
    let db = DbClient::from_url(&url).await.expect("pool");
    db.init_schema().await.expect("schema");

    let directory = SqlDirectoryRepository::new(db.clone());
    directory
        .insert_employer(&Employer {
            id: "emp-1".into(),
            name: "Acme".into(),
            allows_sponsored_groups: true,
            default_subsidy_percent: None,
        })
        .await
        .expect("employer");
    for profile in [
        client(PLAIN_CLIENT, None, Some("cus_plain")),
        client(GRANT_CLIENT, Some("emp-1"), Some("cus_grant")),
        client(GROUP_CLIENT, Some("emp-1"), Some("cus_group")),
        client(NO_CARD_CLIENT, None, None),
    ] {
        directory.insert_client(&profile).await.expect("client");
    }
    directory
        .insert_therapist(&therapist(THERAPIST))
        .await
        .expect("therapist");
    directory
        .insert_therapist(&therapist(DISCONNECTED_THERAPIST))
        .await
        .expect("therapist");

    let ledger = SqlSubsidyLedgerRepository::new(db.clone());
    ledger
        .insert_direct_subsidy(&DirectSubsidyGrant {
            id: GRANT_ID.into(),
            client_id: GRANT_CLIENT.into(),
            employer_id: Some("emp-1".into()),
            remaining_cents: 5000,
            expires_at: None,
            created_at: Utc::now() - Duration::days(10),
        })
        .await
        .expect("grant");
    ledger
        .insert_group(&GroupCreditPool {
            group_id: GROUP_ID.into(),
            employer_id: "emp-1".into(),
            name: "Wellbeing circle".into(),
            remaining_credits: 3,
        })
        .await
        .expect("group");
    ledger
        .add_membership(GROUP_ID, GROUP_CLIENT)
        .await
        .expect("membership");

    let credentials = SqlCalendarCredentialRepository::new(db.clone());
    credentials
        .connect(
            THERAPIST,
            "access-0",
            "refresh-0",
            Some(Utc::now() + Duration::hours(1)),
            Some("ther-1@example.com"),
        )
        .await
        .expect("connect");

    let timeout = StdDuration::from_secs(5);
    let calendar = Arc::new(MockCalendarService::new().with_time_zone("America/New_York"));
    let endpoint = Arc::new(MockTokenEndpoint::new());
    let tokens = Arc::new(TokenLifecycleManager::new(
        endpoint.clone(),
        credentials,
        &gcal_config(),
        timeout,
    ));
    let slots = Arc::new(SlotCoordinator::new(
        calendar.clone(),
        tokens,
        "America/New_York",
        timeout,
    ));

    let payments = Arc::new(MockPaymentService::new());
    let payments_repo = SqlSessionPaymentRepository::new(db.clone());
    let settlement = Arc::new(SettlementOrchestrator::new(
        payments.clone(),
        payments_repo.clone(),
        "usd",
        10,
        timeout,
    ));
    let notifier = Arc::new(RecordingNotifier::new());

    let engine = Arc::new(BookingEngine::new(
        db.clone(),
        slots,
        settlement,
        notifier.clone(),
        &config,
    ));

    Harness {
        _dir: dir,
        bookings: SqlBookingSessionRepository::new(db),
        ledger,
        payments_repo,
        calendar,
        endpoint,
        payments,
        notifier,
        engine,
    }
}

pub fn local(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .expect("valid local time")
}

pub fn as_client(id: &str) -> CallerIdentity {
    CallerIdentity::new(id, Role::Client)
}

pub fn as_therapist() -> CallerIdentity {
    CallerIdentity::new(THERAPIST, Role::Therapist)
}

pub fn as_admin() -> CallerIdentity {
    CallerIdentity::new("admin-1", Role::Admin)
}

/// One hour with the seeded therapist, starting at `hour` Chicago time.
pub fn request(hour: u32) -> ClientBookingRequest {
    ClientBookingRequest {
        therapist_id: THERAPIST.into(),
        start_time: local(hour, 0),
        end_time: local(hour + 1, 0),
        time_zone: Some("America/Chicago".into()),
        notes: None,
        client_id: None,
    }
}
