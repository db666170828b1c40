//! Percentage-based revenue splits.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{div_round_half_up, to_hundredths, DistributionError};

/// A percentage in hundredths of a percent (`1250` is 12.5%), range-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Percentage(i64);

impl Percentage {
    const MAX_HUNDREDTHS: i64 = 100_00;

    pub fn from_hundredths(hundredths: i64) -> Result<Self, DistributionError> {
        if !(0..=Self::MAX_HUNDREDTHS).contains(&hundredths) {
            return Err(DistributionError::PercentageOutOfRange(format!(
                "{}.{:02}",
                hundredths / 100,
                (hundredths % 100).abs()
            )));
        }
        Ok(Self(hundredths))
    }

    pub fn from_decimal(value: &BigDecimal) -> Result<Self, DistributionError> {
        let hundredths = to_hundredths("percentage", value)?;
        Self::from_hundredths(hundredths)
            .map_err(|_| DistributionError::PercentageOutOfRange(value.to_string()))
    }

    pub fn whole(percent: i64) -> Result<Self, DistributionError> {
        Self::from_hundredths(percent.saturating_mul(100))
    }

    pub fn hundredths(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitInput {
    pub split_id: Uuid,
    pub percentage: Percentage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAllocation {
    pub split_id: Uuid,
    pub percentage: Percentage,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReport {
    pub gross_sales: i64,
    pub splits: Vec<SplitAllocation>,
    pub total_split: i64,
    pub your_share: i64,
    /// Set when the active percentages add up to more than the gross could
    /// cover and later splits were capped.
    pub over_allocated: bool,
}

/// Splits `gross_sales` across `splits` in order.
///
/// Each amount is `round_half_up(gross * p / 100)`, capped at what is left of
/// the gross. The residual is computed by subtraction, so
/// `total_split + your_share == gross_sales` always holds and `your_share`
/// is never negative.
pub fn compute_revenue_split(
    gross_sales: i64,
    splits: &[SplitInput],
) -> Result<SplitReport, DistributionError> {
    if gross_sales < 0 {
        return Err(DistributionError::Negative {
            field: "gross_sales",
        });
    }

    let gross = i128::from(gross_sales);
    let mut remaining = gross;
    let mut over_allocated = false;
    let mut allocations = Vec::with_capacity(splits.len());

    for split in splits {
        let exact = div_round_half_up(
            gross * i128::from(split.percentage.hundredths()),
            i128::from(Percentage::MAX_HUNDREDTHS),
        );
        let amount = if exact > remaining {
            over_allocated = true;
            remaining
        } else {
            exact
        };
        remaining -= amount;
        allocations.push(SplitAllocation {
            split_id: split.split_id,
            percentage: split.percentage,
            // bounded by gross_sales, which is an i64
            amount: amount as i64,
        });
    }

    let total_split: i64 = allocations.iter().map(|a| a.amount).sum();
    Ok(SplitReport {
        gross_sales,
        splits: allocations,
        total_split,
        your_share: gross_sales - total_split,
        over_allocated,
    })
}
