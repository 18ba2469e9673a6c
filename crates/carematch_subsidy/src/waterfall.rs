//! The three-tier subsidy waterfall as a pure function.
//!
//! Each tier only sees the residual left by the previous one:
//! sponsored-group credit, then direct grants oldest-first, then the employer's
//! default percentage.

use carematch_common::models::{DirectDraw, DirectSubsidyGrant, GroupCreditPool, SubsidyBreakdown};
use chrono::{DateTime, Utc};

/// Everything the waterfall looks at for one booking.
#[derive(Debug, Clone)]
pub struct WaterfallInputs<'a> {
    pub total_cost_cents: i64,
    pub allows_sponsored_groups: bool,
    /// The client's active group memberships.
    pub groups: &'a [GroupCreditPool],
    pub direct_grants: &'a [DirectSubsidyGrant],
    pub default_percent: Option<i64>,
    /// Flat value of one credit; `None` means a credit covers the whole session.
    pub group_credit_value_cents: Option<i64>,
    pub now: DateTime<Utc>,
}

/// Group tier: the pool with the fewest remaining credits, one credit per booking.
fn pick_group(groups: &[GroupCreditPool]) -> Option<&GroupCreditPool> {
    groups
        .iter()
        .filter(|g| g.remaining_credits >= 1)
        .min_by(|a, b| {
            a.remaining_credits
                .cmp(&b.remaining_credits)
                .then_with(|| a.group_id.cmp(&b.group_id))
        })
}

pub fn compute_waterfall(inputs: &WaterfallInputs<'_>) -> SubsidyBreakdown {
    let total = inputs.total_cost_cents.max(0);
    let mut residual = total;
    let mut breakdown = SubsidyBreakdown {
        total_cost_cents: total,
        ..Default::default()
    };

    // 1. sponsored group
    if inputs.allows_sponsored_groups && residual > 0 {
        if let Some(group) = pick_group(inputs.groups) {
            let credit_value = inputs
                .group_credit_value_cents
                .filter(|v| *v > 0)
                .unwrap_or(total);
            let draw = residual.min(credit_value);
            if draw > 0 {
                breakdown.group_cents = draw;
                breakdown.group_id = Some(group.group_id.clone());
                residual -= draw;
            }
        }
    }

    // 2. direct grants, oldest first
    if residual > 0 {
        let mut grants: Vec<&DirectSubsidyGrant> = inputs
            .direct_grants
            .iter()
            .filter(|g| g.is_active(inputs.now))
            .collect();
        grants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        for grant in grants {
            if residual == 0 {
                break;
            }
            let draw = residual.min(grant.remaining_cents);
            breakdown.direct_draws.push(DirectDraw {
                subsidy_id: grant.id.clone(),
                cents: draw,
            });
            breakdown.direct_cents += draw;
            residual -= draw;
        }
    }

    // 3. percentage of the residual, rounded down
    if residual > 0 {
        if let Some(percent) = inputs.default_percent {
            let percent = percent.clamp(0, 100);
            let covered = residual * percent / 100;
            breakdown.percentage_cents = covered;
            residual -= covered;
        }
    }

    breakdown.subsidy_used_cents =
        breakdown.group_cents + breakdown.direct_cents + breakdown.percentage_cents;
    breakdown.out_of_pocket_cents = residual;
    breakdown
}
