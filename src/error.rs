use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::jobs::QueueError;
use crate::ports::RepositoryError;
use crate::services::{ReportError, SyncError, TipPoolError};
use crate::webhook::GatewayError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream error: {0}")]
    BadGateway(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Conflict(what) => AppError::Conflict(what),
            RepositoryError::Corrupt(what) => AppError::Internal(what),
            RepositoryError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Database(e) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::NotConnected(_) => AppError::NotFound(e.to_string()),
            SyncError::Processor(e) => AppError::BadGateway(e.to_string()),
            SyncError::Repository(e) => e.into(),
        }
    }
}

impl From<TipPoolError> for AppError {
    fn from(e: TipPoolError) -> Self {
        match e {
            TipPoolError::NotFound(_) => AppError::NotFound(e.to_string()),
            TipPoolError::Invalid(msg) => AppError::Validation(msg),
            TipPoolError::Distribution(e) => AppError::Validation(e.to_string()),
            TipPoolError::Conflict(msg) => AppError::Conflict(msg),
            TipPoolError::Repository(e) => e.into(),
        }
    }
}

impl From<ReportError> for AppError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::InvalidRange => AppError::Validation(e.to_string()),
            ReportError::Distribution(e) => AppError::Validation(e.to_string()),
            ReportError::Repository(e) => e.into(),
        }
    }
}

/// Signature and payload problems are the sender's fault; anything else
/// must surface as a 5xx so the processor redelivers.
impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Signature(_) | GatewayError::Malformed(_) => {
                AppError::BadRequest(e.to_string())
            }
            GatewayError::Handler(_) => AppError::Internal(e.to_string()),
        }
    }
}
