use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Principal;
use crate::services::RevenueReport;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    /// First day, inclusive (UTC).
    pub start: NaiveDate,
    /// Last day, inclusive (UTC).
    pub end: NaiveDate,
}

#[utoipa::path(
    get,
    path = "/catalogs/{id}/revenue-report",
    params(("id" = Uuid, Path, description = "Catalog id"), ReportQuery),
    responses(
        (status = 200, description = "Revenue split report", body = RevenueReport),
        (status = 422, description = "Invalid date range")
    ),
    tag = "Reports"
)]
pub async fn revenue_report(
    State(state): State<AppState>,
    principal: Principal,
    Path(catalog_id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<RevenueReport>, AppError> {
    let report = state
        .revenue_reports
        .report(principal.organization_id, catalog_id, query.start, query.end)
        .await?;
    Ok(Json(report))
}
