use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::event::{Envelope, EventKind, ParsedEvent, ProcessorEvent};
use super::signature::{verify_signature, SignatureError};
use crate::ports::{RepositoryError, WebhookEventRepository};

/// What a handler did with an event. Both outcomes mark the event processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Applied,
    /// Nothing to change: unknown entity, guard rejection or stale data.
    Skipped,
}

#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    /// Errors are infrastructure failures; the event stays unrecorded so the
    /// processor redelivers it.
    async fn handle(&self, event: &ParsedEvent) -> Result<HandlerOutcome, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Processed { kind: EventKind, outcome: HandlerOutcome },
    Ignored { event_type: String },
    Duplicate,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Event handling failed: {0}")]
    Handler(#[from] RepositoryError),
}

/// Verifies, deduplicates and dispatches processor events.
pub struct WebhookGateway {
    secret: String,
    tolerance_secs: i64,
    events: Arc<dyn WebhookEventRepository>,
    handlers: HashMap<EventKind, Arc<dyn WebhookEventHandler>>,
}

impl WebhookGateway {
    pub fn new(
        secret: impl Into<String>,
        tolerance_secs: i64,
        events: Arc<dyn WebhookEventRepository>,
    ) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
            events,
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, kinds: &[EventKind], handler: Arc<dyn WebhookEventHandler>) -> Self {
        for kind in kinds {
            self.handlers.insert(*kind, handler.clone());
        }
        self
    }

    pub async fn receive(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<GatewayOutcome, GatewayError> {
        self.receive_at(raw_body, signature_header, Utc::now().timestamp())
            .await
    }

    pub async fn receive_at(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        now: i64,
    ) -> Result<GatewayOutcome, GatewayError> {
        if let Err(e) = verify_signature(raw_body, signature_header, &self.secret, self.tolerance_secs, now) {
            tracing::warn!(error = %e, body_size = raw_body.len(), "Rejected webhook signature");
            return Err(e.into());
        }

        let envelope =
            Envelope::parse(raw_body).map_err(|e| GatewayError::Malformed(e.to_string()))?;

        let Some(kind) = envelope.kind() else {
            tracing::info!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "Ignoring unhandled event type"
            );
            return Ok(GatewayOutcome::Ignored {
                event_type: envelope.event_type,
            });
        };

        if self.events.is_processed(&envelope.id).await? {
            tracing::info!(event_id = %envelope.id, event_type = %kind, "Duplicate event");
            return Ok(GatewayOutcome::Duplicate);
        }

        let Some(handler) = self.handlers.get(&kind) else {
            tracing::info!(event_id = %envelope.id, event_type = %kind, "No handler registered");
            return Ok(GatewayOutcome::Ignored {
                event_type: envelope.event_type,
            });
        };

        let event = ProcessorEvent::decode(kind, envelope.data.object).map_err(|e| {
            tracing::warn!(event_id = %envelope.id, event_type = %kind, error = %e, "Undecodable event object");
            GatewayError::Malformed(e.to_string())
        })?;
        let parsed = ParsedEvent {
            id: envelope.id,
            kind,
            account: envelope.account,
            event,
        };

        let outcome = match handler.handle(&parsed).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(event_id = %parsed.id, event_type = %kind, error = %e, "Event handler failed");
                return Err(e.into());
            }
        };

        let recorded = self
            .events
            .record_processed(&parsed.id, kind.as_str(), parsed.account.as_deref())
            .await?;
        if !recorded {
            tracing::info!(event_id = %parsed.id, "Event recorded concurrently by another delivery");
        }

        tracing::info!(
            event_id = %parsed.id,
            event_type = %kind,
            outcome = ?outcome,
            "Processed webhook event"
        );
        Ok(GatewayOutcome::Processed { kind, outcome })
    }
}
