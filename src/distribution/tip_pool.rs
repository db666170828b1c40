//! Hours-weighted tip pool allocation.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{div_round_half_up, to_hundredths, DistributionError};

/// Hours worked in hundredths of an hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hours(i64);

impl Hours {
    pub fn from_hundredths(hundredths: i64) -> Result<Self, DistributionError> {
        if hundredths < 0 {
            return Err(DistributionError::Negative {
                field: "hours_worked",
            });
        }
        Ok(Self(hundredths))
    }

    pub fn from_decimal(value: &BigDecimal) -> Result<Self, DistributionError> {
        Self::from_hundredths(to_hundredths("hours_worked", value)?)
    }

    pub fn whole(hours: i64) -> Result<Self, DistributionError> {
        Self::from_hundredths(hours.saturating_mul(100))
    }

    pub fn hundredths(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHours {
    pub member_id: Uuid,
    pub hours: Hours,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberShare {
    pub member_id: Uuid,
    pub share: i64,
}

/// Splits `total_tips` across members in proportion to hours worked.
///
/// Every member but the last gets `round_half_up(hours / total_hours * total)`,
/// capped at what is still undistributed; the last member takes the exact
/// remainder. The sum of shares always equals `total_tips` and no share is
/// negative. The result depends on member order, so callers must pass a
/// stable ordering.
pub fn allocate_tip_pool(
    total_tips: i64,
    members: &[MemberHours],
) -> Result<Vec<MemberShare>, DistributionError> {
    if total_tips < 0 {
        return Err(DistributionError::Negative {
            field: "total_tips",
        });
    }
    let Some((last, rest)) = members.split_last() else {
        return Err(DistributionError::NoMembers);
    };

    let total_hours: i128 = members.iter().map(|m| i128::from(m.hours.hundredths())).sum();
    if total_hours <= 0 {
        return Err(DistributionError::ZeroTotalHours);
    }

    let total = i128::from(total_tips);
    let mut distributed: i128 = 0;
    let mut shares = Vec::with_capacity(members.len());

    for member in rest {
        let proportional =
            div_round_half_up(i128::from(member.hours.hundredths()) * total, total_hours);
        let share = proportional.min(total - distributed);
        distributed += share;
        shares.push(MemberShare {
            member_id: member.member_id,
            share: share as i64,
        });
    }

    shares.push(MemberShare {
        member_id: last.member_id,
        share: (total - distributed) as i64,
    });

    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(hours_hundredths: &[i64]) -> Vec<MemberHours> {
        hours_hundredths
            .iter()
            .map(|h| MemberHours {
                member_id: Uuid::new_v4(),
                hours: Hours::from_hundredths(*h).unwrap(),
            })
            .collect()
    }

    fn shares(total: i64, hours: &[i64]) -> Vec<i64> {
        allocate_tip_pool(total, &members(hours))
            .unwrap()
            .into_iter()
            .map(|s| s.share)
            .collect()
    }

    #[test]
    fn test_scenario_ten_ten_five_hours() {
        assert_eq!(shares(10_000, &[10_00, 10_00, 5_00]), vec![4000, 4000, 2000]);
    }

    #[test]
    fn test_last_member_absorbs_rounding() {
        // 100 / 3 = 33.33 -> 33, 33, and 34 for the last member
        assert_eq!(shares(100, &[1_00, 1_00, 1_00]), vec![33, 33, 34]);
        // 200 / 3 = 66.67 -> 67, 67, and 66 for the last member
        assert_eq!(shares(200, &[1_00, 1_00, 1_00]), vec![67, 67, 66]);
    }

    #[test]
    fn test_cap_prevents_negative_remainder() {
        // Uncapped this would give 2 + 2 and leave -1 for the last member.
        assert_eq!(shares(3, &[1_00, 1_00, 0]), vec![2, 1, 0]);
    }

    #[test]
    fn test_conservation_over_many_inputs() {
        let hour_sets: Vec<Vec<i64>> = vec![
            vec![1],
            vec![8_00, 8_00],
            vec![7_25, 3_50, 0, 12_75],
            vec![1, 1, 1, 1, 1, 1, 1],
            vec![40_00, 0_01],
            vec![3_33; 17],
            vec![0, 0, 5_00],
        ];
        for total in [0_i64, 1, 2, 3, 7, 99, 100, 101, 10_000, 987_654_321] {
            for hours in &hour_sets {
                let result = shares(total, hours);
                assert_eq!(result.len(), hours.len());
                assert_eq!(result.iter().sum::<i64>(), total);
                assert!(result.iter().all(|s| *s >= 0));
            }
        }
    }

    #[test]
    fn test_recalculation_is_reproducible() {
        let input = members(&[6_50, 4_25, 9_00]);
        let first = allocate_tip_pool(12_345, &input).unwrap();
        let second = allocate_tip_pool(12_345, &input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_total_hours_is_rejected() {
        assert_eq!(
            allocate_tip_pool(1000, &members(&[0, 0])),
            Err(DistributionError::ZeroTotalHours)
        );
    }

    #[test]
    fn test_empty_members_is_rejected() {
        assert_eq!(allocate_tip_pool(1000, &[]), Err(DistributionError::NoMembers));
    }

    #[test]
    fn test_negative_inputs_are_rejected() {
        assert!(Hours::from_hundredths(-5).is_err());
        assert!(matches!(
            allocate_tip_pool(-1, &members(&[1_00])),
            Err(DistributionError::Negative { field: "total_tips" })
        ));
    }
}
