use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::domain::{TipPool, TipPoolMember};
use crate::error::AppError;
use crate::middleware::Principal;
use crate::services::{NewTipPool, NewTipPoolMember, TipPoolDetails};
use crate::AppState;

async fn authorize(state: &AppState, principal: &Principal, pool_id: Uuid) -> Result<(), AppError> {
    let owner = state.tip_pools.owner(pool_id).await?;
    principal.ensure_org(owner)
}

#[utoipa::path(
    post,
    path = "/tip-pools",
    request_body = NewTipPool,
    responses(
        (status = 201, description = "Pool created in draft", body = TipPool),
        (status = 403, description = "Principal belongs to another organization"),
        (status = 422, description = "Invalid pool")
    ),
    tag = "Tip pools"
)]
pub async fn create_pool(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<NewTipPool>,
) -> Result<impl IntoResponse, AppError> {
    principal.ensure_org(request.organization_id)?;
    let pool = state.tip_pools.create_pool(request).await?;
    Ok((StatusCode::CREATED, Json(pool)))
}

#[utoipa::path(
    get,
    path = "/tip-pools/{id}",
    params(("id" = Uuid, Path, description = "Tip pool id")),
    responses(
        (status = 200, description = "Pool and members", body = TipPoolDetails),
        (status = 404, description = "Unknown pool")
    ),
    tag = "Tip pools"
)]
pub async fn get_pool(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<TipPoolDetails>, AppError> {
    let details = state.tip_pools.get_pool(id).await?;
    principal.ensure_org(details.pool.organization_id)?;
    Ok(Json(details))
}

#[utoipa::path(
    post,
    path = "/tip-pools/{id}/members",
    params(("id" = Uuid, Path, description = "Tip pool id")),
    request_body = NewTipPoolMember,
    responses(
        (status = 201, description = "Member added", body = TipPoolMember),
        (status = 409, description = "Pool is finalized"),
        (status = 422, description = "Invalid member")
    ),
    tag = "Tip pools"
)]
pub async fn add_member(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<NewTipPoolMember>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &principal, id).await?;
    let member = state.tip_pools.add_member(id, request).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[utoipa::path(
    post,
    path = "/tip-pools/{id}/calculate",
    params(("id" = Uuid, Path, description = "Tip pool id")),
    responses(
        (status = 200, description = "Shares computed", body = TipPoolDetails),
        (status = 409, description = "Pool is finalized or changed concurrently"),
        (status = 422, description = "Pool cannot be distributed")
    ),
    tag = "Tip pools"
)]
pub async fn calculate(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<TipPoolDetails>, AppError> {
    authorize(&state, &principal, id).await?;
    Ok(Json(state.tip_pools.calculate(id).await?))
}

#[utoipa::path(
    post,
    path = "/tip-pools/{id}/finalize",
    params(("id" = Uuid, Path, description = "Tip pool id")),
    responses(
        (status = 200, description = "Pool finalized and payouts queued", body = TipPoolDetails),
        (status = 409, description = "Pool is not calculated")
    ),
    tag = "Tip pools"
)]
pub async fn finalize(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<TipPoolDetails>, AppError> {
    authorize(&state, &principal, id).await?;
    let details = state.tip_pools.finalize(id).await?;
    tracing::info!(tip_pool_id = %id, subject = %principal.subject, "Tip pool finalized");
    Ok(Json(details))
}
