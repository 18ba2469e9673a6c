#[cfg(test)]
mod tests {
    use crate::waterfall::{compute_waterfall, WaterfallInputs};
    use carematch_common::models::{DirectSubsidyGrant, GroupCreditPool};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    fn grants_from(amounts: &[i64]) -> Vec<DirectSubsidyGrant> {
        let now = Utc::now();
        amounts
            .iter()
            .enumerate()
            .map(|(i, cents)| DirectSubsidyGrant {
                id: format!("grant-{}", i),
                client_id: "client-1".into(),
                employer_id: Some("emp-1".into()),
                remaining_cents: *cents,
                expires_at: None,
                created_at: now - Duration::days(100 - i as i64),
            })
            .collect()
    }

    proptest! {
        #[test]
        fn subsidy_and_out_of_pocket_sum_to_total(
            total in 0i64..100_000,
            credits in 0i64..5,
            credit_value in proptest::option::of(1i64..20_000),
            grants in proptest::collection::vec(1i64..20_000, 0..4),
            percent in proptest::option::of(0i64..=100),
        ) {
            let groups = vec![GroupCreditPool {
                group_id: "g-1".into(),
                employer_id: "emp-1".into(),
                name: "Group".into(),
                remaining_credits: credits,
            }];
            let grants = grants_from(&grants);
            let b = compute_waterfall(&WaterfallInputs {
                total_cost_cents: total,
                allows_sponsored_groups: true,
                groups: &groups,
                direct_grants: &grants,
                default_percent: percent,
                group_credit_value_cents: credit_value,
                now: Utc::now(),
            });

            prop_assert!(b.is_conserved());
            prop_assert!(b.out_of_pocket_cents >= 0);
            prop_assert!(b.group_cents >= 0 && b.direct_cents >= 0 && b.percentage_cents >= 0);
            for (draw, grant) in b.direct_draws.iter().zip(grants.iter()) {
                prop_assert!(draw.cents <= grant.remaining_cents);
            }
        }

        #[test]
        fn out_of_pocket_matches_closed_form(
            total in 0i64..100_000,
            group_value in 0i64..20_000,
            direct in 0i64..50_000,
            percent in 0i64..=100,
        ) {
            let groups = vec![GroupCreditPool {
                group_id: "g-1".into(),
                employer_id: "emp-1".into(),
                name: "Group".into(),
                remaining_credits: if group_value > 0 { 1 } else { 0 },
            }];
            let grants = if direct > 0 { grants_from(&[direct]) } else { Vec::new() };
            let b = compute_waterfall(&WaterfallInputs {
                total_cost_cents: total,
                allows_sponsored_groups: true,
                groups: &groups,
                direct_grants: &grants,
                default_percent: Some(percent),
                group_credit_value_cents: Some(group_value.max(1)),
                now: Utc::now(),
            });

            let g = if group_value > 0 { group_value.min(total) } else { 0 };
            let after_group = total - g;
            let residual = after_group - direct.min(after_group);
            let expected = residual - residual * percent / 100;
            prop_assert_eq!(b.out_of_pocket_cents, expected);
        }

        #[test]
        fn later_tiers_only_see_the_residual(
            total in 1i64..100_000,
            direct in 1i64..200_000,
        ) {
            let grants = grants_from(&[direct]);
            let b = compute_waterfall(&WaterfallInputs {
                total_cost_cents: total,
                allows_sponsored_groups: false,
                groups: &[],
                direct_grants: &grants,
                default_percent: Some(50),
                group_credit_value_cents: None,
                now: Utc::now(),
            });
            prop_assert_eq!(b.direct_cents, direct.min(total));
            prop_assert_eq!(b.percentage_cents, (total - b.direct_cents) * 50 / 100);
        }
    }
}
