//! Sponsored-group credit pools, direct subsidy grants and their allocation audit trail.

use crate::codec::{self, fmt_ts};
use crate::error::DbError;
use crate::{DbClient, DbTransaction};
use carematch_common::models::{DirectSubsidyGrant, GroupCreditPool};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use tracing::{debug, error, warn};

/// Which ledger an allocation drew from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationSource {
    SponsoredGroup,
    DirectSubsidy,
}

impl AllocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationSource::SponsoredGroup => "sponsored_group",
            AllocationSource::DirectSubsidy => "direct_subsidy",
        }
    }
}

/// One ledger decrement, paired with the booking that consumed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsidyAllocation {
    pub id: String,
    pub booking_session_id: String,
    pub source_kind: String,
    pub source_id: String,
    /// Credits for groups, cents for direct grants.
    pub units: i64,
    pub amount_cents: i64,
}

#[derive(Debug, Clone)]
pub struct SqlSubsidyLedgerRepository {
    db_client: DbClient,
}

impl SqlSubsidyLedgerRepository {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    /// Groups of `employer_id` the client actively belongs to that still hold credits,
    /// fewest remaining credits first. Memberships left over from a previous employer
    /// are not returned.
    pub async fn active_group_pools(
        &self,
        client_id: &str,
        employer_id: &str,
    ) -> Result<Vec<GroupCreditPool>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.employer_id, g.name, g.remaining_credits
            FROM sponsored_groups g
            JOIN group_memberships m ON m.group_id = g.id
            WHERE m.client_id = $1 AND g.employer_id = $2
              AND m.active = 1 AND g.remaining_credits > 0
            ORDER BY g.remaining_credits ASC, g.id ASC
            "#,
        )
        .bind(client_id)
        .bind(employer_id)
        .fetch_all(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(client_id = %client_id, "Failed to load group credit pools: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        rows.iter().map(map_group).collect()
    }

    /// Direct grants with a positive balance, oldest first. Expiry is left to the caller.
    pub async fn direct_grants(&self, client_id: &str) -> Result<Vec<DirectSubsidyGrant>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, client_id, employer_id, remaining_cents, expires_at, created_at
            FROM direct_subsidies
            WHERE client_id = $1 AND remaining_cents > 0
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(client_id)
        .fetch_all(self.db_client.pool())
        .await
        .map_err(|e| {
            error!(client_id = %client_id, "Failed to load direct subsidies: {}", e);
            DbError::QueryError(e.to_string())
        })?;

        rows.iter().map(map_grant).collect()
    }

    /// Guarded decrement; `false` when the pool no longer holds `credits`.
    pub async fn decrement_group_credits(
        &self,
        tx: &mut DbTransaction<'_>,
        group_id: &str,
        credits: i64,
    ) -> Result<bool, DbError> {
        debug!(group_id = %group_id, credits, "Decrementing group credits");
        let result = sqlx::query(
            r#"
            UPDATE sponsored_groups
            SET remaining_credits = remaining_credits - $1
            WHERE id = $2 AND remaining_credits >= $3
            "#,
        )
        .bind(credits)
        .bind(group_id)
        .bind(credits)
        .execute(&mut **tx)
        .await
        .map_err(|e| DbError::QueryError(e.to_string()))?;

        let applied = result.rows_affected() == 1;
        if !applied {
            warn!(group_id = %group_id, credits, "Group credit decrement lost to a concurrent booking");
        }
        Ok(applied)
    }

    /// Guarded decrement; `false` when the grant no longer holds `cents`.
    pub async fn decrement_direct_subsidy(
        &self,
        tx: &mut DbTransaction<'_>,
        subsidy_id: &str,
        cents: i64,
    ) -> Result<bool, DbError> {
        debug!(subsidy_id = %subsidy_id, cents, "Decrementing direct subsidy");
        let result = sqlx::query(
            r#"
            UPDATE direct_subsidies
            SET remaining_cents = remaining_cents - $1
            WHERE id = $2 AND remaining_cents >= $3
            "#,
        )
        .bind(cents)
        .bind(subsidy_id)
        .bind(cents)
        .execute(&mut **tx)
        .await
        .map_err(|e| DbError::QueryError(e.to_string()))?;

        let applied = result.rows_affected() == 1;
        if !applied {
            warn!(subsidy_id = %subsidy_id, cents, "Direct subsidy decrement lost to a concurrent booking");
        }
        Ok(applied)
    }

    pub async fn record_allocation(
        &self,
        tx: &mut DbTransaction<'_>,
        allocation: &SubsidyAllocation,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO subsidy_allocations
                (id, booking_session_id, source_kind, source_id, units, amount_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&allocation.id)
        .bind(&allocation.booking_session_id)
        .bind(&allocation.source_kind)
        .bind(&allocation.source_id)
        .bind(allocation.units)
        .bind(allocation.amount_cents)
        .bind(fmt_ts(Utc::now()))
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!(booking_id = %allocation.booking_session_id, "Failed to record subsidy allocation: {}", e);
            DbError::QueryError(e.to_string())
        })?;
        Ok(())
    }

    pub async fn allocations_for_booking(
        &self,
        booking_session_id: &str,
    ) -> Result<Vec<SubsidyAllocation>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, booking_session_id, source_kind, source_id, units, amount_cents
            FROM subsidy_allocations
            WHERE booking_session_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(booking_session_id)
        .fetch_all(self.db_client.pool())
        .await
        .map_err(|e| DbError::QueryError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(SubsidyAllocation {
                    id: codec::text(row, "id")?,
                    booking_session_id: codec::text(row, "booking_session_id")?,
                    source_kind: codec::text(row, "source_kind")?,
                    source_id: codec::text(row, "source_id")?,
                    units: codec::int(row, "units")?,
                    amount_cents: codec::int(row, "amount_cents")?,
                })
            })
            .collect()
    }

    pub async fn find_group(&self, group_id: &str) -> Result<Option<GroupCreditPool>, DbError> {
        let row = sqlx::query(
            "SELECT id, employer_id, name, remaining_credits FROM sponsored_groups WHERE id = $1",
        )
        .bind(group_id)
        .fetch_optional(self.db_client.pool())
        .await?;
        row.as_ref().map(map_group).transpose()
    }

    pub async fn find_direct_subsidy(
        &self,
        subsidy_id: &str,
    ) -> Result<Option<DirectSubsidyGrant>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, client_id, employer_id, remaining_cents, expires_at, created_at
            FROM direct_subsidies WHERE id = $1
            "#,
        )
        .bind(subsidy_id)
        .fetch_optional(self.db_client.pool())
        .await?;
        row.as_ref().map(map_grant).transpose()
    }

    pub async fn insert_group(&self, group: &GroupCreditPool) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO sponsored_groups (id, employer_id, name, remaining_credits) VALUES ($1, $2, $3, $4)",
        )
        .bind(&group.group_id)
        .bind(&group.employer_id)
        .bind(&group.name)
        .bind(group.remaining_credits)
        .execute(self.db_client.pool())
        .await?;
        Ok(())
    }

    pub async fn add_membership(&self, group_id: &str, client_id: &str) -> Result<(), DbError> {
        sqlx::query("INSERT INTO group_memberships (group_id, client_id, active) VALUES ($1, $2, 1)")
            .bind(group_id)
            .bind(client_id)
            .execute(self.db_client.pool())
            .await?;
        Ok(())
    }

    pub async fn insert_direct_subsidy(&self, grant: &DirectSubsidyGrant) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO direct_subsidies (id, client_id, employer_id, remaining_cents, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&grant.id)
        .bind(&grant.client_id)
        .bind(grant.employer_id.clone())
        .bind(grant.remaining_cents)
        .bind(grant.expires_at.map(fmt_ts))
        .bind(fmt_ts(grant.created_at))
        .execute(self.db_client.pool())
        .await?;
        Ok(())
    }
}

fn map_group(row: &AnyRow) -> Result<GroupCreditPool, DbError> {
    Ok(GroupCreditPool {
        group_id: codec::text(row, "id")?,
        employer_id: codec::text(row, "employer_id")?,
        name: codec::text(row, "name")?,
        remaining_credits: codec::int(row, "remaining_credits")?,
    })
}

fn map_grant(row: &AnyRow) -> Result<DirectSubsidyGrant, DbError> {
    Ok(DirectSubsidyGrant {
        id: codec::text(row, "id")?,
        client_id: codec::text(row, "client_id")?,
        employer_id: codec::opt_text(row, "employer_id")?,
        remaining_cents: codec::int(row, "remaining_cents")?,
        expires_at: codec::opt_ts(row, "expires_at")?,
        created_at: codec::ts(row, "created_at")?,
    })
}
