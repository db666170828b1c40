//! Dispatch-table entries: each maps a decoded event onto a service call.

use async_trait::async_trait;
use std::sync::Arc;

use super::event::{EventKind, ParsedEvent, ProcessorEvent};
use super::router::{HandlerOutcome, WebhookEventHandler, WebhookGateway};
use crate::domain::{OrderKey, OrderTransition};
use crate::ports::RepositoryError;
use crate::services::{AccountSyncService, OrderService, PayoutService};

fn outcome<T>(changed: Option<T>) -> HandlerOutcome {
    match changed {
        Some(_) => HandlerOutcome::Applied,
        None => HandlerOutcome::Skipped,
    }
}

fn unexpected(event: &ParsedEvent) -> HandlerOutcome {
    tracing::warn!(
        event_id = %event.id,
        event_type = %event.kind,
        "Event routed to the wrong handler"
    );
    HandlerOutcome::Skipped
}

/// `payment_intent.*` and `charge.refunded`.
pub struct PaymentEventHandler {
    orders: Arc<OrderService>,
}

impl PaymentEventHandler {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }

    /// Translates the event into the single guarded write it implies.
    pub fn transition(event: &ProcessorEvent) -> Option<OrderTransition> {
        match event {
            ProcessorEvent::PaymentSucceeded(intent) => Some(OrderTransition::Succeeded {
                key: OrderKey::PaymentIntent(intent.id.clone()),
                charge_id: intent.charge_id(),
            }),
            ProcessorEvent::PaymentFailed(intent) => Some(OrderTransition::Failed {
                key: OrderKey::PaymentIntent(intent.id.clone()),
                failure_message: intent.failure_message(),
            }),
            ProcessorEvent::PaymentProcessing(intent) => Some(OrderTransition::Processing {
                key: OrderKey::PaymentIntent(intent.id.clone()),
            }),
            ProcessorEvent::ChargeRefunded(charge) => {
                let key = match &charge.payment_intent {
                    Some(intent) => OrderKey::PaymentIntent(intent.clone()),
                    None => OrderKey::Charge(charge.id.clone()),
                };
                Some(OrderTransition::Refunded {
                    key,
                    amount_refunded: charge.amount_refunded,
                })
            }
            _ => None,
        }
    }
}

#[async_trait]
impl WebhookEventHandler for PaymentEventHandler {
    async fn handle(&self, event: &ParsedEvent) -> Result<HandlerOutcome, RepositoryError> {
        let Some(transition) = Self::transition(&event.event) else {
            return Ok(unexpected(event));
        };
        Ok(outcome(self.orders.apply(&transition).await?))
    }
}

/// `account.updated` and `account.external_account.*`.
pub struct AccountEventHandler {
    sync: Arc<AccountSyncService>,
}

impl AccountEventHandler {
    pub fn new(sync: Arc<AccountSyncService>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl WebhookEventHandler for AccountEventHandler {
    async fn handle(&self, event: &ParsedEvent) -> Result<HandlerOutcome, RepositoryError> {
        match &event.event {
            ProcessorEvent::AccountUpdated(account) => {
                Ok(outcome(self.sync.sync_from_event(account).await?))
            }
            ProcessorEvent::ExternalAccountChanged(external) => {
                let Some(account_id) = event.account.as_deref().or(external.account.as_deref()) else {
                    tracing::info!(event_id = %event.id, "External account event without an account");
                    return Ok(HandlerOutcome::Skipped);
                };
                if self.sync.mark_pending(account_id).await? {
                    Ok(HandlerOutcome::Applied)
                } else {
                    Ok(HandlerOutcome::Skipped)
                }
            }
            _ => Ok(unexpected(event)),
        }
    }
}

/// `payout.*` and `transfer.reversed`.
pub struct PayoutEventHandler {
    payouts: Arc<PayoutService>,
}

impl PayoutEventHandler {
    pub fn new(payouts: Arc<PayoutService>) -> Self {
        Self { payouts }
    }
}

#[async_trait]
impl WebhookEventHandler for PayoutEventHandler {
    async fn handle(&self, event: &ParsedEvent) -> Result<HandlerOutcome, RepositoryError> {
        match &event.event {
            ProcessorEvent::PayoutChanged(payout) => Ok(outcome(
                self.payouts
                    .record_payout(event.account.as_deref(), payout)
                    .await?,
            )),
            ProcessorEvent::TransferReversed(transfer) => {
                Ok(outcome(self.payouts.record_transfer_reversal(transfer).await?))
            }
            _ => Ok(unexpected(event)),
        }
    }
}

/// Installs the payment, account and payout handlers on the gateway.
pub fn register_handlers(
    gateway: WebhookGateway,
    orders: Arc<OrderService>,
    sync: Arc<AccountSyncService>,
    payouts: Arc<PayoutService>,
) -> WebhookGateway {
    gateway
        .register(&EventKind::PAYMENT, Arc::new(PaymentEventHandler::new(orders)))
        .register(&EventKind::ACCOUNT, Arc::new(AccountEventHandler::new(sync)))
        .register(&EventKind::PAYOUT, Arc::new(PayoutEventHandler::new(payouts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::event::{ChargeObject, PaymentIntentObject};
    use serde_json::json;

    #[test]
    fn test_refund_prefers_payment_intent_key() {
        let charge: ChargeObject = serde_json::from_value(json!({
            "id": "ch_1",
            "payment_intent": "pi_1",
            "amount_refunded": 500
        }))
        .unwrap();
        let transition = PaymentEventHandler::transition(&ProcessorEvent::ChargeRefunded(charge)).unwrap();
        assert_eq!(
            transition,
            OrderTransition::Refunded {
                key: OrderKey::PaymentIntent("pi_1".to_string()),
                amount_refunded: 500,
            }
        );
    }

    #[test]
    fn test_refund_without_intent_uses_charge_key() {
        let charge: ChargeObject =
            serde_json::from_value(json!({"id": "ch_1", "amount_refunded": 500})).unwrap();
        let transition = PaymentEventHandler::transition(&ProcessorEvent::ChargeRefunded(charge)).unwrap();
        assert_eq!(transition.key(), &OrderKey::Charge("ch_1".to_string()));
    }

    #[test]
    fn test_failed_payment_carries_message() {
        let intent: PaymentIntentObject = serde_json::from_value(json!({
            "id": "pi_1",
            "last_payment_error": {"message": "Your card was declined."}
        }))
        .unwrap();
        let transition = PaymentEventHandler::transition(&ProcessorEvent::PaymentFailed(intent)).unwrap();
        assert_eq!(
            transition,
            OrderTransition::Failed {
                key: OrderKey::PaymentIntent("pi_1".to_string()),
                failure_message: Some("Your card was declined.".to_string()),
            }
        );
    }
}
