//! Calendar OAuth credentials embedded on the therapist row.
//!
//! Writes are plain overwrites (last writer wins); concurrent refreshes for the same
//! therapist both produce valid tokens.

use crate::codec::{self, fmt_ts};
use crate::error::DbError;
use crate::DbClient;
use carematch_common::models::{CalendarCredential, IntegrationStatus};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct SqlCalendarCredentialRepository {
    db_client: DbClient,
}

impl SqlCalendarCredentialRepository {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    /// `None` when the therapist does not exist.
    pub async fn load(&self, therapist_id: &str) -> Result<Option<CalendarCredential>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, gcal_access_token, gcal_refresh_token, gcal_token_expires_at,
                   gcal_integration_status, gcal_calendar_email
            FROM therapists WHERE id = $1
            "#,
        )
        .bind(therapist_id)
        .fetch_optional(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(therapist_id = %therapist_id, "Failed to load calendar credential: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        row.as_ref()
            .map(|row| {
                Ok(CalendarCredential {
                    therapist_id: codec::text(row, "id")?,
                    access_token: codec::opt_text(row, "gcal_access_token")?,
                    refresh_token: codec::opt_text(row, "gcal_refresh_token")?,
                    token_expires_at: codec::opt_ts(row, "gcal_token_expires_at")?,
                    integration_status: IntegrationStatus::parse(&codec::text(
                        row,
                        "gcal_integration_status",
                    )?),
                    calendar_email: codec::opt_text(row, "gcal_calendar_email")?,
                })
            })
            .transpose()
    }

    /// Stores a refreshed access token. The refresh token is only replaced when the
    /// provider issued a new one.
    pub async fn store_refreshed_tokens(
        &self,
        therapist_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), DbError> {
        debug!(therapist_id = %therapist_id, "Persisting refreshed calendar tokens");
        let result = sqlx::query(
            r#"
            UPDATE therapists
            SET gcal_access_token = $1,
                gcal_refresh_token = COALESCE($2, gcal_refresh_token),
                gcal_token_expires_at = $3,
                gcal_updated_at = $4
            WHERE id = $5 AND gcal_integration_status = 'connected'
            "#,
        )
        .bind(access_token)
        .bind(refresh_token.map(str::to_string))
        .bind(expires_at.map(fmt_ts))
        .bind(fmt_ts(Utc::now()))
        .bind(therapist_id)
        .execute(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(therapist_id = %therapist_id, "Failed to persist refreshed tokens: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!(
                "connected calendar for therapist {}",
                therapist_id
            )));
        }
        Ok(())
    }

    /// Writes a freshly authorized credential and marks the integration connected.
    pub async fn connect(
        &self,
        therapist_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: Option<DateTime<Utc>>,
        calendar_email: Option<&str>,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE therapists
            SET gcal_access_token = $1,
                gcal_refresh_token = $2,
                gcal_token_expires_at = $3,
                gcal_calendar_email = $4,
                gcal_integration_status = 'connected',
                gcal_updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at.map(fmt_ts))
        .bind(calendar_email.map(str::to_string))
        .bind(fmt_ts(Utc::now()))
        .bind(therapist_id)
        .execute(self.db_client.pool())
        .await
        .map_err(|e| DbError::QueryError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("therapist {}", therapist_id)));
        }
        info!(therapist_id = %therapist_id, "Calendar integration connected");
        Ok(())
    }

    /// Clears every credential field and marks the integration disconnected in one statement.
    pub async fn disconnect(&self, therapist_id: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE therapists
            SET gcal_access_token = NULL,
                gcal_refresh_token = NULL,
                gcal_token_expires_at = NULL,
                gcal_calendar_email = NULL,
                gcal_integration_status = 'not_connected',
                gcal_updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(fmt_ts(Utc::now()))
        .bind(therapist_id)
        .execute(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(therapist_id = %therapist_id, "Failed to clear calendar credential: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        info!(therapist_id = %therapist_id, "Calendar integration disconnected");
        Ok(())
    }
}
