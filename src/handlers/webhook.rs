use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::webhook::{GatewayOutcome, HandlerOutcome, SIGNATURE_HEADER};
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// `applied`, `skipped`, `duplicate` or `ignored`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl From<GatewayOutcome> for WebhookAck {
    fn from(outcome: GatewayOutcome) -> Self {
        let (outcome, event_type) = match outcome {
            GatewayOutcome::Processed { kind, outcome } => {
                let label = match outcome {
                    HandlerOutcome::Applied => "applied",
                    HandlerOutcome::Skipped => "skipped",
                };
                (label, Some(kind.as_str().to_string()))
            }
            GatewayOutcome::Duplicate => ("duplicate", None),
            GatewayOutcome::Ignored { event_type } => ("ignored", Some(event_type)),
        };
        WebhookAck {
            received: true,
            outcome,
            event_type,
        }
    }
}

/// Processor webhook endpoint. The body is taken raw: the signature covers
/// the exact bytes sent.
#[utoipa::path(
    post,
    path = "/webhooks/processor",
    request_body(content = String, description = "Raw processor event JSON"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Bad signature or malformed event"),
        (status = 500, description = "Event not recorded; processor will redeliver")
    ),
    tag = "Webhooks"
)]
pub async fn receive_processor_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let outcome = state.gateway.receive(&body, signature).await?;
    Ok(Json(outcome.into()))
}
