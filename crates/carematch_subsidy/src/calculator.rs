//! Loads a client's subsidy sources, runs the waterfall, and consumes ledgers inside the
//! booking transaction.

use carematch_common::models::SubsidyBreakdown;
use carematch_db::{
    AllocationSource, DbTransaction, SqlDirectoryRepository, SqlSubsidyLedgerRepository,
    SubsidyAllocation,
};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::SubsidyError;
use crate::waterfall::{compute_waterfall, WaterfallInputs};

#[derive(Debug, Clone)]
pub struct SubsidyCalculator {
    directory: SqlDirectoryRepository,
    ledger: SqlSubsidyLedgerRepository,
    group_credit_value_cents: Option<i64>,
}

impl SubsidyCalculator {
    pub fn new(
        directory: SqlDirectoryRepository,
        ledger: SqlSubsidyLedgerRepository,
        group_credit_value_cents: Option<i64>,
    ) -> Self {
        Self {
            directory,
            ledger,
            group_credit_value_cents,
        }
    }

    /// Side-effect free: safe to call for quotes and again right before commit.
    #[instrument(skip(self))]
    pub async fn compute_subsidy(
        &self,
        client_id: &str,
        total_cost_cents: i64,
    ) -> Result<SubsidyBreakdown, SubsidyError> {
        if total_cost_cents < 0 {
            return Err(SubsidyError::InvalidCost(total_cost_cents));
        }

        let client = self
            .directory
            .find_client(client_id)
            .await?
            .ok_or_else(|| SubsidyError::ClientNotFound(client_id.to_string()))?;

        let Some(employer_id) = client.employer_id.as_deref() else {
            debug!(client_id = %client_id, "Client has no employer, no subsidy");
            return Ok(SubsidyBreakdown::unsubsidized(total_cost_cents));
        };
        let Some(employer) = self.directory.find_employer(employer_id).await? else {
            warn!(client_id = %client_id, employer_id = %employer_id, "Client references unknown employer");
            return Ok(SubsidyBreakdown::unsubsidized(total_cost_cents));
        };

        let groups = if employer.allows_sponsored_groups {
            self.ledger.active_group_pools(client_id, employer_id).await?
        } else {
            Vec::new()
        };
        let grants = self.ledger.direct_grants(client_id).await?;

        let breakdown = compute_waterfall(&WaterfallInputs {
            total_cost_cents,
            allows_sponsored_groups: employer.allows_sponsored_groups,
            groups: &groups,
            direct_grants: &grants,
            default_percent: employer.default_subsidy_percent,
            group_credit_value_cents: self.group_credit_value_cents,
            now: Utc::now(),
        });

        debug!(
            client_id = %client_id,
            group = breakdown.group_cents,
            direct = breakdown.direct_cents,
            percentage = breakdown.percentage_cents,
            out_of_pocket = breakdown.out_of_pocket_cents,
            "Computed subsidy waterfall"
        );
        Ok(breakdown)
    }

    /// Decrements every ledger the breakdown draws from and records the paired
    /// allocation rows, all on `tx`. The booking row must already be written to `tx`.
    ///
    /// A decrement that finds less balance than quoted fails the whole transaction.
    #[instrument(skip(self, tx, breakdown))]
    pub async fn apply_allocation(
        &self,
        tx: &mut DbTransaction<'_>,
        booking_id: &str,
        breakdown: &SubsidyBreakdown,
    ) -> Result<Vec<SubsidyAllocation>, SubsidyError> {
        let mut allocations = Vec::new();

        if let Some(group_id) = breakdown.group_id.as_deref().filter(|_| breakdown.group_cents > 0) {
            if !self.ledger.decrement_group_credits(tx, group_id, 1).await? {
                return Err(SubsidyError::LedgerConflict {
                    source_kind: AllocationSource::SponsoredGroup.as_str(),
                    source_id: group_id.to_string(),
                });
            }
            allocations.push(SubsidyAllocation {
                id: Uuid::new_v4().to_string(),
                booking_session_id: booking_id.to_string(),
                source_kind: AllocationSource::SponsoredGroup.as_str().to_string(),
                source_id: group_id.to_string(),
                units: 1,
                amount_cents: breakdown.group_cents,
            });
        }

        for draw in breakdown.direct_draws.iter().filter(|d| d.cents > 0) {
            if !self
                .ledger
                .decrement_direct_subsidy(tx, &draw.subsidy_id, draw.cents)
                .await?
            {
                return Err(SubsidyError::LedgerConflict {
                    source_kind: AllocationSource::DirectSubsidy.as_str(),
                    source_id: draw.subsidy_id.clone(),
                });
            }
            allocations.push(SubsidyAllocation {
                id: Uuid::new_v4().to_string(),
                booking_session_id: booking_id.to_string(),
                source_kind: AllocationSource::DirectSubsidy.as_str().to_string(),
                source_id: draw.subsidy_id.clone(),
                units: draw.cents,
                amount_cents: draw.cents,
            });
        }

        for allocation in &allocations {
            self.ledger.record_allocation(tx, allocation).await?;
        }

        if !allocations.is_empty() {
            info!(booking_id = %booking_id, count = allocations.len(), "Recorded subsidy allocations");
        }
        Ok(allocations)
    }
}
