//! Clients, therapists and employers.
//!
//! Profile management lives upstream; the engine only reads these rows. The insert
//! methods exist for seeding and tests.

use crate::codec;
use crate::error::DbError;
use crate::DbClient;
use carematch_common::models::{ClientProfile, Employer, TherapistProfile};
use sqlx::any::AnyRow;
use tracing::error;

#[derive(Debug, Clone)]
pub struct SqlDirectoryRepository {
    db_client: DbClient,
}

impl SqlDirectoryRepository {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    pub async fn find_client(&self, id: &str) -> Result<Option<ClientProfile>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, full_name, employer_id, payment_customer_id, time_zone
            FROM clients WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(client_id = %id, "Failed to load client: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        row.as_ref().map(map_client).transpose()
    }

    pub async fn find_therapist(&self, id: &str) -> Result<Option<TherapistProfile>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, full_name, session_rate_cents, payout_account_id, time_zone
            FROM therapists WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(therapist_id = %id, "Failed to load therapist: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        row.as_ref().map(map_therapist).transpose()
    }

    pub async fn find_employer(&self, id: &str) -> Result<Option<Employer>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, allows_sponsored_groups, default_subsidy_percent
            FROM employers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.db_client.pool())
        .await
        .map_err(|e| DbError::QueryError(e.to_string()))?;

        row.as_ref()
            .map(|row| {
                Ok(Employer {
                    id: codec::text(row, "id")?,
                    name: codec::text(row, "name")?,
                    allows_sponsored_groups: codec::flag(row, "allows_sponsored_groups")?,
                    default_subsidy_percent: codec::opt_int(row, "default_subsidy_percent")?,
                })
            })
            .transpose()
    }

    pub async fn insert_employer(&self, employer: &Employer) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO employers (id, name, allows_sponsored_groups, default_subsidy_percent)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&employer.id)
        .bind(&employer.name)
        .bind(i64::from(employer.allows_sponsored_groups))
        .bind(employer.default_subsidy_percent)
        .execute(self.db_client.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_client(&self, client: &ClientProfile) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO clients (id, email, full_name, employer_id, payment_customer_id, time_zone)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&client.id)
        .bind(&client.email)
        .bind(&client.full_name)
        .bind(client.employer_id.clone())
        .bind(client.payment_customer_id.clone())
        .bind(client.time_zone.clone())
        .execute(self.db_client.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_therapist(&self, therapist: &TherapistProfile) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO therapists (id, email, full_name, session_rate_cents, payout_account_id, time_zone)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&therapist.id)
        .bind(&therapist.email)
        .bind(&therapist.full_name)
        .bind(therapist.session_rate_cents)
        .bind(therapist.payout_account_id.clone())
        .bind(therapist.time_zone.clone())
        .execute(self.db_client.pool())
        .await?;
        Ok(())
    }
}

fn map_client(row: &AnyRow) -> Result<ClientProfile, DbError> {
    Ok(ClientProfile {
        id: codec::text(row, "id")?,
        email: codec::text(row, "email")?,
        full_name: codec::text(row, "full_name")?,
        employer_id: codec::opt_text(row, "employer_id")?,
        payment_customer_id: codec::opt_text(row, "payment_customer_id")?,
        time_zone: codec::opt_text(row, "time_zone")?,
    })
}

fn map_therapist(row: &AnyRow) -> Result<TherapistProfile, DbError> {
    Ok(TherapistProfile {
        id: codec::text(row, "id")?,
        email: codec::text(row, "email")?,
        full_name: codec::text(row, "full_name")?,
        session_rate_cents: codec::int(row, "session_rate_cents")?,
        payout_account_id: codec::opt_text(row, "payout_account_id")?,
        time_zone: codec::opt_text(row, "time_zone")?,
    })
}
