//! Fund distribution engine.
//!
//! Pure, integer-only allocation of money in minor currency units. Decimal
//! inputs (percentages, hours) are carried as hundredths so every division is
//! exact integer arithmetic with explicit round-half-up.

pub mod revenue_split;
pub mod tip_pool;

use bigdecimal::{BigDecimal, ToPrimitive};
use thiserror::Error;

pub use revenue_split::{compute_revenue_split, Percentage, SplitAllocation, SplitInput, SplitReport};
pub use tip_pool::{allocate_tip_pool, Hours, MemberHours, MemberShare};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error("{field} must not be negative")]
    Negative { field: &'static str },

    #[error("percentage {0} is outside 0..=100")]
    PercentageOutOfRange(String),

    #[error("{field} allows at most two decimal places, got {value}")]
    TooPrecise { field: &'static str, value: String },

    #[error("total hours must be greater than zero")]
    ZeroTotalHours,

    #[error("no members to distribute to")]
    NoMembers,
}

/// Converts a decimal with at most two fractional digits into hundredths.
pub(crate) fn to_hundredths(field: &'static str, value: &BigDecimal) -> Result<i64, DistributionError> {
    let scaled = value * BigDecimal::from(100);
    let whole = scaled.with_scale(0);
    if whole != scaled {
        return Err(DistributionError::TooPrecise {
            field,
            value: value.to_string(),
        });
    }
    whole
        .to_i64()
        .ok_or_else(|| DistributionError::TooPrecise {
            field,
            value: value.to_string(),
        })
}

/// `round(numerator / denominator)` with halves rounded up. Both operands
/// must be non-negative and the denominator positive.
pub(crate) fn div_round_half_up(numerator: i128, denominator: i128) -> i128 {
    (2 * numerator + denominator) / (2 * denominator)
}
