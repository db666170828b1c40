//! Organization-scoped real-time events pushed to websocket subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const ORDER_COMPLETED: &str = "order.completed";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const ORDER_REFUNDED: &str = "order.refunded";
pub const PAYOUT_UPDATED: &str = "payout.updated";
pub const ACCOUNT_UPDATED: &str = "merchant_account.updated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub organization_id: Uuid,
    pub event: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RealtimeEvent {
    pub fn new(organization_id: Uuid, event: &str, data: serde_json::Value) -> Self {
        Self {
            organization_id,
            event: event.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out hub. Every subscriber sees every event and filters by
/// organization; slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many subscribers received the event. Having none is fine.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!("No realtime subscribers connected");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(256)
    }
}
