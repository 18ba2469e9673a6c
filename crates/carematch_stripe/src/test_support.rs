//! Shared fixtures for the settlement tests: a throwaway SQLite ledger and a mock
//! processor.

use carematch_common::models::{
    BookingMetadata, BookingSession, BookingStatus, ClientProfile, TherapistProfile,
};
use carematch_db::{
    DbClient, SqlBookingSessionRepository, SqlDirectoryRepository, SqlSessionPaymentRepository,
};
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use crate::service::mock::MockPaymentService;
use crate::settlement::SettlementOrchestrator;

pub struct Harness {
    _dir: TempDir,
    pub db: DbClient,
    pub bookings: SqlBookingSessionRepository,
    pub payments: Arc<MockPaymentService>,
    pub orchestrator: Arc<SettlementOrchestrator<MockPaymentService>>,
    pub client: ClientProfile,
    pub therapist: TherapistProfile,
}

pub async fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("stripe.db").display());
    let db = DbClient::from_url(&url).await.expect("pool");
    db.init_schema().await.expect("schema");

    let client = ClientProfile {
        id: "client-1".into(),
        email: "client@example.com".into(),
        full_name: "Casey Client".into(),
        employer_id: None,
        payment_customer_id: Some("cus_1".into()),
        time_zone: None,
    };
    let therapist = TherapistProfile {
        id: "ther-1".into(),
        email: "therapist@example.com".into(),
        full_name: "Taylor Therapist".into(),
        session_rate_cents: 15000,
        payout_account_id: Some("acct_1".into()),
        time_zone: None,
    };
    let directory = SqlDirectoryRepository::new(db.clone());
    directory.insert_client(&client).await.expect("client");
    directory.insert_therapist(&therapist).await.expect("therapist");

    let payments = Arc::new(MockPaymentService::new());
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        payments.clone(),
        SqlSessionPaymentRepository::new(db.clone()),
        "usd",
        10,
        std::time::Duration::from_secs(5),
    ));

    Harness {
        _dir: dir,
        bookings: SqlBookingSessionRepository::new(db.clone()),
        db,
        payments,
        orchestrator,
        client,
        therapist,
    }
}

/// A confirmed $150 session with `subsidy_cents` covered by a direct grant.
pub fn booking(id: &str, subsidy_cents: i64) -> BookingSession {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
    BookingSession {
        id: id.into(),
        client_id: "client-1".into(),
        therapist_id: "ther-1".into(),
        session_date: start.date_naive(),
        session_start_time: start,
        session_end_time: start + Duration::hours(1),
        status: BookingStatus::Confirmed,
        external_calendar_event_id: None,
        cancellation_reason: None,
        sponsoring_group_id: None,
        total_cost_cents: 15000,
        group_subsidy_cents: 0,
        direct_subsidy_cents: subsidy_cents,
        percentage_subsidy_cents: 0,
        out_of_pocket_cents: 15000 - subsidy_cents,
        metadata: BookingMetadata::default(),
        created_at: start,
        updated_at: start,
    }
}

impl Harness {
    /// Writes the booking and settles it in one committed transaction.
    pub async fn book(&self, booking: &BookingSession) -> carematch_common::models::SessionPayment {
        let mut tx = self.db.begin().await.unwrap();
        self.bookings.insert(&mut tx, booking).await.unwrap();
        let payment = self
            .orchestrator
            .settle_booking(&mut tx, booking, &self.client, &self.therapist)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        payment
    }
}
