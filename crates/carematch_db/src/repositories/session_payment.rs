//! Session payment persistence.

use crate::codec::{self, fmt_ts};
use crate::error::DbError;
use crate::{DbClient, DbTransaction};
use carematch_common::models::{PaymentStatus, SessionPayment};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use tracing::{debug, error, info};

const COLUMNS: &str = "booking_session_id, total_amount_cents, subsidy_used_cents, \
    out_of_pocket_cents, platform_fee_cents, currency, external_payment_reference, status, \
    charged_at, created_at";

#[derive(Debug, Clone)]
pub struct SqlSessionPaymentRepository {
    db_client: DbClient,
}

impl SqlSessionPaymentRepository {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    pub async fn insert(
        &self,
        tx: &mut DbTransaction<'_>,
        payment: &SessionPayment,
    ) -> Result<(), DbError> {
        debug!(
            booking_id = %payment.booking_session_id,
            payment_reference = %payment.external_payment_reference,
            "Inserting session payment"
        );

        let query = format!(
            "INSERT INTO session_payments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            COLUMNS
        );

        sqlx::query(&query)
            .bind(&payment.booking_session_id)
            .bind(payment.total_amount_cents)
            .bind(payment.subsidy_used_cents)
            .bind(payment.out_of_pocket_cents)
            .bind(payment.platform_fee_cents)
            .bind(&payment.currency)
            .bind(&payment.external_payment_reference)
            .bind(payment.status.as_str())
            .bind(payment.charged_at.map(fmt_ts))
            .bind(fmt_ts(payment.created_at))
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                error!(booking_id = %payment.booking_session_id, "Failed to insert session payment: {}", e);
                DbError::QueryError(e.to_string())
            })?;

        Ok(())
    }

    pub async fn find_by_booking(
        &self,
        booking_session_id: &str,
    ) -> Result<Option<SessionPayment>, DbError> {
        let query = format!(
            "SELECT {} FROM session_payments WHERE booking_session_id = $1",
            COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(booking_session_id)
            .fetch_optional(self.db_client.pool())
            .await
            .map_err(|e| DbError::QueryError(e.to_string()))?;

        row.as_ref().map(map_row).transpose()
    }

    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<SessionPayment>, DbError> {
        let query = format!(
            "SELECT {} FROM session_payments WHERE external_payment_reference = $1",
            COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(reference)
            .fetch_optional(self.db_client.pool())
            .await
            .map_err(|e| DbError::QueryError(e.to_string()))?;

        row.as_ref().map(map_row).transpose()
    }

    /// Moves a pending payment to its final status.
    ///
    /// Returns `false` when the payment was already settled; a settled payment is never
    /// rewritten.
    pub async fn settle(
        &self,
        booking_session_id: &str,
        status: PaymentStatus,
        charged_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE session_payments
            SET status = $1, charged_at = $2
            WHERE booking_session_id = $3 AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(charged_at.map(fmt_ts))
        .bind(booking_session_id)
        .execute(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(booking_id = %booking_session_id, "Failed to settle session payment: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        let settled = result.rows_affected() == 1;
        if settled {
            info!(booking_id = %booking_session_id, status = %status, "Session payment settled");
        }
        Ok(settled)
    }
}

fn map_row(row: &AnyRow) -> Result<SessionPayment, DbError> {
    let status: PaymentStatus =
        codec::text(row, "status")?
            .parse()
            .map_err(|e: carematch_common::CareMatchError| DbError::DecodeError {
                column: "status".to_string(),
                message: e.to_string(),
            })?;

    Ok(SessionPayment {
        booking_session_id: codec::text(row, "booking_session_id")?,
        total_amount_cents: codec::int(row, "total_amount_cents")?,
        subsidy_used_cents: codec::int(row, "subsidy_used_cents")?,
        out_of_pocket_cents: codec::int(row, "out_of_pocket_cents")?,
        platform_fee_cents: codec::int(row, "platform_fee_cents")?,
        currency: codec::text(row, "currency")?,
        external_payment_reference: codec::text(row, "external_payment_reference")?,
        status,
        charged_at: codec::opt_ts(row, "charged_at")?,
        created_at: codec::ts(row, "created_at")?,
    })
}
