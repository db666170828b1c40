use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::distribution::{compute_revenue_split, DistributionError};
use crate::domain::RevenueSplit;
use crate::ports::{OrderRepository, RepositoryError, RevenueSplitRepository};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("end must not be before start")]
    InvalidRange,

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RevenueSplitLine {
    pub split_id: Uuid,
    pub recipient_name: String,
    pub recipient_account_id: Option<String>,
    /// Two-decimal percentage as a string, e.g. `"12.50"`.
    pub percentage: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RevenueReport {
    pub catalog_id: Uuid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub gross_sales: i64,
    pub splits: Vec<RevenueSplitLine>,
    pub total_split: i64,
    pub your_share: i64,
    pub over_allocated: bool,
}

pub struct RevenueReportService {
    orders: Arc<dyn OrderRepository>,
    splits: Arc<dyn RevenueSplitRepository>,
}

impl RevenueReportService {
    pub fn new(orders: Arc<dyn OrderRepository>, splits: Arc<dyn RevenueSplitRepository>) -> Self {
        Self { orders, splits }
    }

    /// Splits the organization's completed sales for the catalog in
    /// `[start, end]` (UTC dates) across the catalog's active revenue splits.
    pub async fn report(
        &self,
        organization_id: Uuid,
        catalog_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RevenueReport, ReportError> {
        if end < start {
            return Err(ReportError::InvalidRange);
        }

        let gross_sales = self
            .orders
            .completed_gross_for_catalog(organization_id, catalog_id, start, end)
            .await?;
        let splits = self.splits.active_for_catalog(catalog_id).await?;
        let inputs = splits
            .iter()
            .map(RevenueSplit::to_input)
            .collect::<Result<Vec<_>, _>>()?;
        let report = compute_revenue_split(gross_sales, &inputs)?;

        let by_id: HashMap<Uuid, &RevenueSplit> = splits.iter().map(|s| (s.id, s)).collect();
        let lines = report
            .splits
            .iter()
            .filter_map(|allocation| {
                let split = by_id.get(&allocation.split_id)?;
                let hundredths = allocation.percentage.hundredths();
                Some(RevenueSplitLine {
                    split_id: split.id,
                    recipient_name: split.recipient_name.clone(),
                    recipient_account_id: split.recipient_account_id.clone(),
                    percentage: format!("{}.{:02}", hundredths / 100, hundredths % 100),
                    amount: allocation.amount,
                })
            })
            .collect();

        if report.over_allocated {
            tracing::warn!(catalog_id = %catalog_id, "Active revenue splits exceed 100%");
        }

        Ok(RevenueReport {
            catalog_id,
            start,
            end,
            gross_sales: report.gross_sales,
            splits: lines,
            total_split: report.total_split,
            your_share: report.your_share,
            over_allocated: report.over_allocated,
        })
    }
}
