use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::distribution::{DistributionError, Percentage, SplitInput};

/// A recipient's percentage of a catalog's sales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub id: Uuid,
    pub catalog_id: Uuid,
    pub recipient_name: String,
    pub recipient_account_id: Option<String>,
    pub percentage: BigDecimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl RevenueSplit {
    pub fn new(
        catalog_id: Uuid,
        recipient_name: impl Into<String>,
        recipient_account_id: Option<String>,
        percentage: BigDecimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            catalog_id,
            recipient_name: recipient_name.into(),
            recipient_account_id,
            percentage,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn to_input(&self) -> Result<SplitInput, DistributionError> {
        Ok(SplitInput {
            split_id: self.id,
            percentage: Percentage::from_decimal(&self.percentage)?,
        })
    }
}
