use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::UnknownStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TipPoolStatus {
    Draft,
    Calculated,
    Finalized,
}

impl TipPoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipPoolStatus::Draft => "draft",
            TipPoolStatus::Calculated => "calculated",
            TipPoolStatus::Finalized => "finalized",
        }
    }
}

impl fmt::Display for TipPoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TipPoolStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TipPoolStatus::Draft),
            "calculated" => Ok(TipPoolStatus::Calculated),
            "finalized" => Ok(TipPoolStatus::Finalized),
            other => Err(UnknownStatus::new("tip pool", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TipPool {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: TipPoolStatus,
    pub total_tips: i64,
    pub calculated_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TipPool {
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        total_tips: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            start_date,
            end_date,
            status: TipPoolStatus::Draft,
            total_tips,
            calculated_at: None,
            finalized_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TipPoolMember {
    pub id: Uuid,
    pub tip_pool_id: Uuid,
    pub user_ref: String,
    pub recipient_account_id: Option<String>,
    #[schema(value_type = String)]
    pub hours_worked: BigDecimal,
    pub tips_earned: i64,
    pub pool_share: Option<i64>,
    pub final_amount: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TipPoolMember {
    pub fn new(
        tip_pool_id: Uuid,
        user_ref: impl Into<String>,
        recipient_account_id: Option<String>,
        hours_worked: BigDecimal,
        tips_earned: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tip_pool_id,
            user_ref: user_ref.into(),
            recipient_account_id,
            hours_worked,
            tips_earned,
            pool_share: None,
            final_amount: None,
            created_at: Utc::now(),
        }
    }
}
