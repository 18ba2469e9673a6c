//! Waterfall against real ledgers in a throwaway SQLite file.

use carematch_common::models::{
    BookingMetadata, BookingSession, BookingStatus, ClientProfile, DirectSubsidyGrant, Employer,
    GroupCreditPool, TherapistProfile,
};
use carematch_db::{
    DbClient, SqlBookingSessionRepository, SqlDirectoryRepository, SqlSubsidyLedgerRepository,
};
use carematch_subsidy::{SubsidyCalculator, SubsidyError};
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    db: DbClient,
    ledger: SqlSubsidyLedgerRepository,
    calculator: SubsidyCalculator,
}

async fn fixture(allows_groups: bool, percent: Option<i64>) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("subsidy.db").display());
    let db = DbClient::from_url(&url).await.expect("pool");
    db.init_schema().await.expect("schema");

    let directory = SqlDirectoryRepository::new(db.clone());
    directory
        .insert_employer(&Employer {
            id: "emp-1".into(),
            name: "Acme".into(),
            allows_sponsored_groups: allows_groups,
            default_subsidy_percent: percent,
        })
        .await
        .unwrap();
    for (id, employer) in [("client-1", Some("emp-1")), ("client-solo", None)] {
        directory
            .insert_client(&ClientProfile {
                id: id.into(),
                email: format!("{}@example.com", id),
                full_name: "Casey Client".into(),
                employer_id: employer.map(String::from),
                payment_customer_id: Some("cus_1".into()),
                time_zone: None,
            })
            .await
            .unwrap();
    }
    directory
        .insert_therapist(&TherapistProfile {
            id: "ther-1".into(),
            email: "therapist@example.com".into(),
            full_name: "Taylor Therapist".into(),
            session_rate_cents: 15000,
            payout_account_id: Some("acct_1".into()),
            time_zone: None,
        })
        .await
        .unwrap();

    let ledger = SqlSubsidyLedgerRepository::new(db.clone());
    let calculator = SubsidyCalculator::new(directory, ledger.clone(), None);
    Fixture {
        _dir: dir,
        db,
        ledger,
        calculator,
    }
}

async fn add_group(f: &Fixture, id: &str, credits: i64) {
    f.ledger
        .insert_group(&GroupCreditPool {
            group_id: id.into(),
            employer_id: "emp-1".into(),
            name: id.into(),
            remaining_credits: credits,
        })
        .await
        .unwrap();
    f.ledger.add_membership(id, "client-1").await.unwrap();
}

async fn add_grant(f: &Fixture, id: &str, cents: i64, client_id: &str) {
    f.ledger
        .insert_direct_subsidy(&DirectSubsidyGrant {
            id: id.into(),
            client_id: client_id.into(),
            employer_id: Some("emp-1".into()),
            remaining_cents: cents,
            expires_at: None,
            created_at: Utc::now() - Duration::days(1),
        })
        .await
        .unwrap();
}

fn booking(id: &str, client_id: &str) -> BookingSession {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
    BookingSession {
        id: id.into(),
        client_id: client_id.into(),
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
        direct_subsidy_cents: 0,
        percentage_subsidy_cents: 0,
        out_of_pocket_cents: 15000,
        metadata: BookingMetadata::default(),
        created_at: start,
        updated_at: start,
    }
}

#[tokio::test]
async fn test_group_credit_consumed_once_with_audit_row() {
    let f = fixture(true, Some(50)).await;
    add_group(&f, "g-1", 3).await;

    let breakdown = f.calculator.compute_subsidy("client-1", 15000).await.unwrap();
    assert_eq!(breakdown.out_of_pocket_cents, 0);
    assert_eq!(breakdown.group_id.as_deref(), Some("g-1"));

    let mut tx = f.db.begin().await.unwrap();
    SqlBookingSessionRepository::new(f.db.clone())
        .insert(&mut tx, &booking("b-1", "client-1"))
        .await
        .unwrap();
    let allocations = f
        .calculator
        .apply_allocation(&mut tx, "b-1", &breakdown)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(allocations.len(), 1);
    assert_eq!(f.ledger.find_group("g-1").await.unwrap().unwrap().remaining_credits, 2);
    let audit = f.ledger.allocations_for_booking("b-1").await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].source_kind, "sponsored_group");
    assert_eq!(audit[0].amount_cents, 15000);
}

#[tokio::test]
async fn test_group_of_former_employer_is_not_drawn() {
    let f = fixture(true, None).await;
    SqlDirectoryRepository::new(f.db.clone())
        .insert_employer(&Employer {
            id: "emp-2".into(),
            name: "Previous Corp".into(),
            allows_sponsored_groups: true,
            default_subsidy_percent: None,
        })
        .await
        .unwrap();
    f.ledger
        .insert_group(&GroupCreditPool {
            group_id: "g-old".into(),
            employer_id: "emp-2".into(),
            name: "g-old".into(),
            remaining_credits: 5,
        })
        .await
        .unwrap();
    f.ledger.add_membership("g-old", "client-1").await.unwrap();

    let breakdown = f.calculator.compute_subsidy("client-1", 15000).await.unwrap();
    assert_eq!(breakdown.group_id, None);
    assert_eq!(breakdown.group_cents, 0);
    assert_eq!(breakdown.out_of_pocket_cents, 15000);
    assert!(f.ledger.active_group_pools("client-1", "emp-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_direct_grant_exhausted_and_rest_left_for_payment() {
    let f = fixture(false, None).await;
    add_grant(&f, "d-1", 5000, "client-1").await;

    let breakdown = f.calculator.compute_subsidy("client-1", 15000).await.unwrap();
    assert_eq!(breakdown.direct_cents, 5000);
    assert_eq!(breakdown.out_of_pocket_cents, 10000);

    let mut tx = f.db.begin().await.unwrap();
    SqlBookingSessionRepository::new(f.db.clone())
        .insert(&mut tx, &booking("b-1", "client-1"))
        .await
        .unwrap();
    f.calculator
        .apply_allocation(&mut tx, "b-1", &breakdown)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let grant = f.ledger.find_direct_subsidy("d-1").await.unwrap().unwrap();
    assert_eq!(grant.remaining_cents, 0);
}

#[tokio::test]
async fn test_stale_quote_conflicts_and_rolls_back() {
    let f = fixture(false, None).await;
    add_grant(&f, "d-1", 5000, "client-1").await;
    let breakdown = f.calculator.compute_subsidy("client-1", 15000).await.unwrap();

    // Another booking spends part of the grant first
    let mut tx = f.db.begin().await.unwrap();
    assert!(f.ledger.decrement_direct_subsidy(&mut tx, "d-1", 1000).await.unwrap());
    tx.commit().await.unwrap();

    let mut tx = f.db.begin().await.unwrap();
    SqlBookingSessionRepository::new(f.db.clone())
        .insert(&mut tx, &booking("b-2", "client-1"))
        .await
        .unwrap();
    let err = f
        .calculator
        .apply_allocation(&mut tx, "b-2", &breakdown)
        .await
        .unwrap_err();
    assert!(matches!(err, SubsidyError::LedgerConflict { .. }));
    tx.rollback().await.unwrap();

    let grant = f.ledger.find_direct_subsidy("d-1").await.unwrap().unwrap();
    assert_eq!(grant.remaining_cents, 4000);
    assert!(f.ledger.allocations_for_booking("b-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_client_without_employer_gets_nothing() {
    let f = fixture(true, Some(50)).await;
    add_grant(&f, "d-solo", 5000, "client-solo").await;

    let breakdown = f.calculator.compute_subsidy("client-solo", 15000).await.unwrap();
    assert_eq!(breakdown.subsidy_used_cents, 0);
    assert_eq!(breakdown.out_of_pocket_cents, 15000);
}

#[tokio::test]
async fn test_unknown_client_and_negative_cost() {
    let f = fixture(true, None).await;
    assert!(matches!(
        f.calculator.compute_subsidy("nobody", 15000).await,
        Err(SubsidyError::ClientNotFound(_))
    ));
    assert!(matches!(
        f.calculator.compute_subsidy("client-1", -1).await,
        Err(SubsidyError::InvalidCost(-1))
    ));
}
