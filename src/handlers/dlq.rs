use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Principal;
use crate::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DlqQuery {
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/dlq/jobs",
    params(DlqQuery),
    responses((status = 200, description = "Dead-lettered jobs, most recent first")),
    tag = "Jobs"
)]
pub async fn list_dead_jobs(
    State(state): State<AppState>,
    _principal: Principal,
    Query(query): Query<DlqQuery>,
) -> Result<Json<Value>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let jobs = state.jobs.list_dead(limit).await?;
    let entries: Vec<Value> = jobs
        .iter()
        .map(|job| {
            json!({
                "id": job.id,
                "queue": job.queue,
                "payload": job.payload,
                "attempts": job.attempts,
                "max_attempts": job.max_attempts,
                "last_error": job.last_error,
                "created_at": job.created_at,
                "updated_at": job.updated_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "dead_jobs": entries,
        "count": entries.len()
    })))
}

#[utoipa::path(
    post,
    path = "/dlq/jobs/{id}/requeue",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job requeued with a fresh attempt budget"),
        (status = 404, description = "No dead job with that id")
    ),
    tag = "Jobs"
)]
pub async fn requeue_dead_job(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    if !state.jobs.requeue_dead(id).await? {
        return Err(AppError::NotFound(format!("Dead job {} not found", id)));
    }
    tracing::info!(job_id = %id, subject = %principal.subject, "Dead job requeued");

    Ok(Json(json!({
        "message": "Job requeued successfully",
        "job_id": id
    })))
}
