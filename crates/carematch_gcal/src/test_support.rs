// Shared setup for the token and coordinator tests.
use std::sync::Arc;
use std::time::Duration as StdDuration;

use carematch_common::models::TherapistProfile;
use carematch_config::GcalConfig;
use carematch_db::{DbClient, SqlCalendarCredentialRepository, SqlDirectoryRepository};
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::logic::SlotCoordinator;
use crate::oauth::mock::MockTokenEndpoint;
use crate::service::mock::MockCalendarService;
use crate::tokens::TokenLifecycleManager;

pub const THERAPIST: &str = "ther-1";

pub struct Harness {
    pub _dir: TempDir,
    pub db: DbClient,
    pub credentials: SqlCalendarCredentialRepository,
    pub endpoint: Arc<MockTokenEndpoint>,
    pub calendar: Arc<MockCalendarService>,
    pub tokens: Arc<TokenLifecycleManager<MockTokenEndpoint>>,
    pub coordinator: SlotCoordinator<MockCalendarService, MockTokenEndpoint>,
}

pub fn gcal_config() -> GcalConfig {
    GcalConfig {
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        redirect_uri: "https://app.example.com/oauth/callback".into(),
        default_time_zone: None,
        refresh_threshold_secs: None,
        conference_domain: None,
        oauth_state_secret: "state-secret".into(),
        authorization_endpoint: None,
        token_endpoint: None,
        tokeninfo_endpoint: None,
    }
}

pub async fn harness(calendar: MockCalendarService) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("gcal.db").display());
    let db = DbClient::from_url(&url).await.expect("pool");
    db.init_schema().await.expect("schema");

    SqlDirectoryRepository::new(db.clone())
        .insert_therapist(&TherapistProfile {
            id: THERAPIST.into(),
            email: "therapist@example.com".into(),
            full_name: "Taylor Therapist".into(),
            session_rate_cents: 15000,
            payout_account_id: Some("acct_1".into()),
            time_zone: None,
        })
        .await
        .expect("therapist");

    let credentials = SqlCalendarCredentialRepository::new(db.clone());
    let endpoint = Arc::new(MockTokenEndpoint::new());
    let calendar = Arc::new(calendar);
    let tokens = Arc::new(TokenLifecycleManager::new(
        endpoint.clone(),
        credentials.clone(),
        &gcal_config(),
        StdDuration::from_secs(5),
    ));
    let coordinator = SlotCoordinator::new(
        calendar.clone(),
        tokens.clone(),
        "America/New_York",
        StdDuration::from_secs(5),
    );

    Harness {
        _dir: dir,
        db,
        credentials,
        endpoint,
        calendar,
        tokens,
        coordinator,
    }
}

impl Harness {
    pub async fn connect(&self, access_token: &str, expires_at: Option<DateTime<Utc>>) {
        self.credentials
            .connect(
                THERAPIST,
                access_token,
                "refresh-1",
                expires_at,
                Some("therapist@example.com"),
            )
            .await
            .expect("connect");
    }
}
