#[cfg(test)]
mod tests {
    use carematch_common::models::intervals_overlap;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    // Two half-open windows share a minute iff they overlap
    fn shares_a_minute(a: (i64, i64), b: (i64, i64)) -> bool {
        (a.0..a.1).any(|m| m >= b.0 && m < b.1)
    }

    proptest! {
        #[test]
        fn overlap_matches_minute_grid(
            a_start in 0i64..600, a_len in 1i64..180,
            b_start in 0i64..600, b_len in 1i64..180,
        ) {
            let a = (a_start, a_start + a_len);
            let b = (b_start, b_start + b_len);
            prop_assert_eq!(
                intervals_overlap(at(a.0), at(a.1), at(b.0), at(b.1)),
                shares_a_minute(a, b)
            );
        }

        #[test]
        fn overlap_is_symmetric(
            a_start in 0i64..600, a_len in 1i64..180,
            b_start in 0i64..600, b_len in 1i64..180,
        ) {
            let (a0, a1) = (at(a_start), at(a_start + a_len));
            let (b0, b1) = (at(b_start), at(b_start + b_len));
            prop_assert_eq!(intervals_overlap(a0, a1, b0, b1), intervals_overlap(b0, b1, a0, a1));
        }

        #[test]
        fn touching_windows_never_overlap(start in 0i64..600, a_len in 1i64..180, b_len in 1i64..180) {
            let boundary = start + a_len;
            prop_assert!(!intervals_overlap(at(start), at(boundary), at(boundary), at(boundary + b_len)));
        }
    }
}
