use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::bearer_token;
use crate::realtime::RealtimeHub;
use crate::AppState;

const HEARTBEAT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    organization_id: Uuid,
    /// Browsers cannot set headers on an upgrade request.
    token: Option<String>,
}

/// Upgrades to a websocket that streams the organization's realtime events.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers));
    let Some(principal) = token.and_then(|t| state.principals.verify(t)) else {
        tracing::warn!(organization_id = %params.organization_id, "Invalid WebSocket authentication token");
        return AppError::Unauthorized("invalid credentials".to_string()).into_response();
    };
    if let Err(e) = principal.ensure_org(params.organization_id) {
        return e.into_response();
    }

    let hub = state.realtime.clone();
    let organization_id = params.organization_id;
    ws.on_upgrade(move |socket| handle_socket(socket, hub, organization_id))
}

async fn handle_socket(socket: WebSocket, hub: RealtimeHub, organization_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = hub.subscribe();
    tracing::info!(organization_id = %organization_id, "WebSocket subscriber connected");

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Text(text) => tracing::debug!(len = text.len(), "Ignoring client message"),
                _ => {}
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_secs(HEARTBEAT_SECS));

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) if event.organization_id == organization_id => {
                            let json = match serde_json::to_string(&event) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!(error = %e, "Failed to serialize realtime event");
                                    continue;
                                }
                            };
                            if sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(organization_id = %organization_id, skipped = n, "WebSocket subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    tracing::info!(organization_id = %organization_id, "WebSocket subscriber disconnected");
}
