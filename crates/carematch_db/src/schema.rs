//! Table bootstrap for the booking engine.

use crate::error::DbError;
use crate::DbClient;
use tracing::{debug, info};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS employers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        allows_sponsored_groups INTEGER NOT NULL DEFAULT 0,
        default_subsidy_percent INTEGER NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS clients (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        full_name TEXT NOT NULL,
        employer_id TEXT NULL REFERENCES employers(id),
        payment_customer_id TEXT NULL,
        time_zone TEXT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS therapists (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        full_name TEXT NOT NULL,
        session_rate_cents INTEGER NOT NULL,
        payout_account_id TEXT NULL,
        time_zone TEXT NULL,
        gcal_access_token TEXT NULL,
        gcal_refresh_token TEXT NULL,
        gcal_token_expires_at TEXT NULL,
        gcal_integration_status TEXT NOT NULL DEFAULT 'not_connected',
        gcal_calendar_email TEXT NULL,
        gcal_updated_at TEXT NULL,
        schedule_version INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sponsored_groups (
        id TEXT PRIMARY KEY,
        employer_id TEXT NOT NULL REFERENCES employers(id),
        name TEXT NOT NULL,
        remaining_credits INTEGER NOT NULL CHECK (remaining_credits >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_memberships (
        group_id TEXT NOT NULL REFERENCES sponsored_groups(id),
        client_id TEXT NOT NULL REFERENCES clients(id),
        active INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (group_id, client_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS direct_subsidies (
        id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES clients(id),
        employer_id TEXT NULL REFERENCES employers(id),
        remaining_cents INTEGER NOT NULL CHECK (remaining_cents >= 0),
        expires_at TEXT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS booking_sessions (
        id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES clients(id),
        therapist_id TEXT NOT NULL REFERENCES therapists(id),
        session_date TEXT NOT NULL,
        session_start_time TEXT NOT NULL,
        session_end_time TEXT NOT NULL,
        status TEXT NOT NULL,
        external_calendar_event_id TEXT NULL,
        cancellation_reason TEXT NULL,
        sponsoring_group_id TEXT NULL REFERENCES sponsored_groups(id),
        total_cost_cents INTEGER NOT NULL,
        group_subsidy_cents INTEGER NOT NULL DEFAULT 0,
        direct_subsidy_cents INTEGER NOT NULL DEFAULT 0,
        percentage_subsidy_cents INTEGER NOT NULL DEFAULT 0,
        out_of_pocket_cents INTEGER NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (session_start_time < session_end_time)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_booking_sessions_therapist_window
        ON booking_sessions (therapist_id, session_start_time, session_end_time)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS session_payments (
        booking_session_id TEXT PRIMARY KEY REFERENCES booking_sessions(id),
        total_amount_cents INTEGER NOT NULL,
        subsidy_used_cents INTEGER NOT NULL,
        out_of_pocket_cents INTEGER NOT NULL,
        platform_fee_cents INTEGER NOT NULL DEFAULT 0,
        currency TEXT NOT NULL,
        external_payment_reference TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        charged_at TEXT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subsidy_allocations (
        id TEXT PRIMARY KEY,
        booking_session_id TEXT NOT NULL REFERENCES booking_sessions(id),
        source_kind TEXT NOT NULL,
        source_id TEXT NOT NULL,
        units INTEGER NOT NULL,
        amount_cents INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

pub async fn init_schema(db: &DbClient) -> Result<(), DbError> {
    debug!("Initializing booking engine schema");
    for statement in STATEMENTS {
        db.execute(statement).await?;
    }
    info!("Booking engine schema initialized successfully");
    Ok(())
}
