use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Principal;
use crate::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    /// Bypass the cache and pull from the processor.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OnboardingLinkRequest {
    pub refresh_url: String,
    pub return_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnboardingLinkResponse {
    pub url: String,
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}/merchant-account/status",
    params(("org_id" = Uuid, Path, description = "Organization id"), StatusQuery),
    responses(
        (status = 200, description = "Merchant account with derived states"),
        (status = 403, description = "Principal belongs to another organization"),
        (status = 404, description = "No merchant account connected"),
        (status = 502, description = "Processor unreachable and nothing cached")
    ),
    tag = "Merchant accounts"
)]
pub async fn account_status(
    State(state): State<AppState>,
    principal: Principal,
    Path(org_id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    principal.ensure_org(org_id)?;
    let status = state.account_sync.get_status(org_id, query.force).await?;
    Ok(Json(status))
}

#[utoipa::path(
    post,
    path = "/organizations/{org_id}/merchant-account/onboarding-link",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = OnboardingLinkRequest,
    responses(
        (status = 201, description = "Hosted onboarding link", body = OnboardingLinkResponse),
        (status = 403, description = "Principal belongs to another organization"),
        (status = 422, description = "Invalid redirect URLs"),
        (status = 502, description = "Processor error")
    ),
    tag = "Merchant accounts"
)]
pub async fn create_onboarding_link(
    State(state): State<AppState>,
    principal: Principal,
    Path(org_id): Path<Uuid>,
    Json(request): Json<OnboardingLinkRequest>,
) -> Result<impl IntoResponse, AppError> {
    principal.ensure_org(org_id)?;
    for (field, value) in [("refresh_url", &request.refresh_url), ("return_url", &request.return_url)] {
        url::Url::parse(value)
            .map_err(|e| AppError::Validation(format!("{} is not a valid URL: {}", field, e)))?;
    }

    let url = state
        .account_sync
        .create_onboarding_link(org_id, &request.refresh_url, &request.return_url)
        .await?;
    tracing::info!(organization_id = %org_id, subject = %principal.subject, "Created onboarding link");
    Ok((StatusCode::CREATED, Json(OnboardingLinkResponse { url })))
}
