//! Booking session persistence.

use crate::codec::{self, fmt_date, fmt_ts};
use crate::error::DbError;
use crate::{DbClient, DbTransaction};
use carematch_common::models::{BookingMetadata, BookingSession, BookingStatus};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use tracing::{debug, error};

const COLUMNS: &str = "id, client_id, therapist_id, session_date, session_start_time, \
    session_end_time, status, external_calendar_event_id, cancellation_reason, \
    sponsoring_group_id, total_cost_cents, group_subsidy_cents, direct_subsidy_cents, \
    percentage_subsidy_cents, out_of_pocket_cents, metadata, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqlBookingSessionRepository {
    db_client: DbClient,
}

impl SqlBookingSessionRepository {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    pub async fn insert(
        &self,
        tx: &mut DbTransaction<'_>,
        booking: &BookingSession,
    ) -> Result<(), DbError> {
        debug!(booking_id = %booking.id, "Inserting booking session");

        let metadata = serde_json::to_string(&booking.metadata).map_err(|e| {
            DbError::QueryError(format!("metadata is not serializable: {}", e))
        })?;

        let query = format!(
            "INSERT INTO booking_sessions ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            COLUMNS
        );

        sqlx::query(&query)
            .bind(&booking.id)
            .bind(&booking.client_id)
            .bind(&booking.therapist_id)
            .bind(fmt_date(booking.session_date))
            .bind(fmt_ts(booking.session_start_time))
            .bind(fmt_ts(booking.session_end_time))
            .bind(booking.status.as_str())
            .bind(booking.external_calendar_event_id.clone())
            .bind(booking.cancellation_reason.clone())
            .bind(booking.sponsoring_group_id.clone())
            .bind(booking.total_cost_cents)
            .bind(booking.group_subsidy_cents)
            .bind(booking.direct_subsidy_cents)
            .bind(booking.percentage_subsidy_cents)
            .bind(booking.out_of_pocket_cents)
            .bind(metadata)
            .bind(fmt_ts(booking.created_at))
            .bind(fmt_ts(booking.updated_at))
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                error!(booking_id = %booking.id, "Failed to insert booking session: {}", e);
                DbError::QueryError(e.to_string())
            })?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<BookingSession>, DbError> {
        let query = format!("SELECT {} FROM booking_sessions WHERE id = $1", COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.db_client.pool())
            .await
            .map_err(|e| {
                error!(booking_id = %id, "Failed to load booking session: {}", e);
                DbError::QueryError(e.to_string())
            })?;

        row.as_ref().map(map_row).transpose()
    }

    /// Write-locks the therapist row so concurrent bookings for the same therapist run their
    /// overlap check one after another. Must be the first statement of the transaction.
    pub async fn lock_therapist_schedule(
        &self,
        tx: &mut DbTransaction<'_>,
        therapist_id: &str,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE therapists SET schedule_version = schedule_version + 1 WHERE id = $1",
        )
        .bind(therapist_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!(therapist_id = %therapist_id, "Failed to lock therapist schedule: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("therapist {}", therapist_id)));
        }
        Ok(())
    }

    /// Non-cancelled sessions of `therapist_id` intersecting `[start, end)`.
    ///
    /// Runs inside `tx` after [`Self::lock_therapist_schedule`].
    pub async fn find_overlapping(
        &self,
        tx: &mut DbTransaction<'_>,
        therapist_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BookingSession>, DbError> {
        let query = format!(
            "SELECT {} FROM booking_sessions \
             WHERE therapist_id = $1 AND status <> 'cancelled' \
             AND session_start_time < $2 AND session_end_time > $3 \
             ORDER BY session_start_time",
            COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(therapist_id)
            .bind(fmt_ts(end))
            .bind(fmt_ts(start))
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| {
                error!(therapist_id = %therapist_id, "Failed to scan sessions for overlap: {}", e);
                DbError::QueryError(e.to_string())
            })?;

        rows.iter()
            .map(map_row)
            .filter(|booking| match booking {
                Ok(b) => b.status.blocks_slot() && b.overlaps(start, end),
                Err(_) => true,
            })
            .collect()
    }

    /// Moves `id` from `from` to `to`, writing the reason, event id and metadata.
    ///
    /// Returns `false` when the row is no longer in `from` (a concurrent update won).
    pub async fn update_status(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
        cancellation_reason: Option<&str>,
        external_calendar_event_id: Option<&str>,
        metadata: &BookingMetadata,
    ) -> Result<bool, DbError> {
        debug!(booking_id = %id, from = %from, to = %to, "Updating booking status");

        let metadata = serde_json::to_string(metadata).map_err(|e| {
            DbError::QueryError(format!("metadata is not serializable: {}", e))
        })?;

        let result = sqlx::query(
            r#"
            UPDATE booking_sessions
            SET status = $1, cancellation_reason = $2, external_calendar_event_id = $3,
                metadata = $4, updated_at = $5
            WHERE id = $6 AND status = $7
            "#,
        )
        .bind(to.as_str())
        .bind(cancellation_reason.map(str::to_string))
        .bind(external_calendar_event_id.map(str::to_string))
        .bind(metadata)
        .bind(fmt_ts(Utc::now()))
        .bind(id)
        .bind(from.as_str())
        .execute(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(booking_id = %id, "Failed to update booking status: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Records the external event on a confirmed or completed booking that has none yet.
    pub async fn attach_calendar_event(
        &self,
        id: &str,
        event_id: &str,
        metadata: &BookingMetadata,
    ) -> Result<bool, DbError> {
        let metadata = serde_json::to_string(metadata).map_err(|e| {
            DbError::QueryError(format!("metadata is not serializable: {}", e))
        })?;

        let result = sqlx::query(
            r#"
            UPDATE booking_sessions
            SET external_calendar_event_id = $1, metadata = $2, updated_at = $3
            WHERE id = $4 AND status IN ('confirmed', 'completed')
              AND external_calendar_event_id IS NULL
            "#,
        )
        .bind(event_id)
        .bind(metadata)
        .bind(fmt_ts(Utc::now()))
        .bind(id)
        .execute(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(booking_id = %id, "Failed to attach calendar event: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Confirmed bookings still lacking an external calendar event, oldest session first.
    pub async fn find_missing_calendar_events(
        &self,
        limit: i64,
    ) -> Result<Vec<BookingSession>, DbError> {
        let query = format!(
            "SELECT {} FROM booking_sessions \
             WHERE status = 'confirmed' AND external_calendar_event_id IS NULL \
             ORDER BY session_start_time LIMIT $1",
            COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(self.db_client.pool())
            .await
            .map_err(|e| {
                error!("Failed to list bookings missing calendar events: {}", e);
                DbError::QueryError(e.to_string())
            })?;

        rows.iter().map(map_row).collect()
    }

    pub async fn count(&self) -> Result<i64, DbError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM booking_sessions")
            .fetch_one(self.db_client.pool())
            .await?;
        codec::int(&row, "n")
    }
}

fn map_row(row: &AnyRow) -> Result<BookingSession, DbError> {
    let status: BookingStatus =
        codec::text(row, "status")?
            .parse()
            .map_err(|e: carematch_common::CareMatchError| DbError::DecodeError {
                column: "status".to_string(),
                message: e.to_string(),
            })?;
    let metadata: BookingMetadata = serde_json::from_str(&codec::text(row, "metadata")?)
        .map_err(|e| DbError::DecodeError {
            column: "metadata".to_string(),
            message: e.to_string(),
        })?;

    Ok(BookingSession {
        id: codec::text(row, "id")?,
        client_id: codec::text(row, "client_id")?,
        therapist_id: codec::text(row, "therapist_id")?,
        session_date: codec::parse_date("session_date", &codec::text(row, "session_date")?)?,
        session_start_time: codec::ts(row, "session_start_time")?,
        session_end_time: codec::ts(row, "session_end_time")?,
        status,
        external_calendar_event_id: codec::opt_text(row, "external_calendar_event_id")?,
        cancellation_reason: codec::opt_text(row, "cancellation_reason")?,
        sponsoring_group_id: codec::opt_text(row, "sponsoring_group_id")?,
        total_cost_cents: codec::int(row, "total_cost_cents")?,
        group_subsidy_cents: codec::int(row, "group_subsidy_cents")?,
        direct_subsidy_cents: codec::int(row, "direct_subsidy_cents")?,
        percentage_subsidy_cents: codec::int(row, "percentage_subsidy_cents")?,
        out_of_pocket_cents: codec::int(row, "out_of_pocket_cents")?,
        metadata,
        created_at: codec::ts(row, "created_at")?,
        updated_at: codec::ts(row, "updated_at")?,
    })
}
