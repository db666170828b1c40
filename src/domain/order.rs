//! Order domain entity and its payment state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownStatus;

/// Lifecycle of an order as driven by processor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::Refunded,
        OrderStatus::PartiallyRefunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
            OrderStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Statuses an order may currently hold for a move to `self` to apply.
    ///
    /// This is the monotonic transition guard: writes are conditional on the
    /// current status being in this set, so stale or out-of-order events can
    /// never move an order backwards. A status is deliberately absent from its
    /// own predecessor set (except `PartiallyRefunded`, which accumulates and
    /// additionally requires a larger refunded amount), so replaying an event
    /// that already applied affects zero rows.
    pub fn allowed_predecessors(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[],
            OrderStatus::Processing => &[OrderStatus::Pending],
            OrderStatus::Completed => &[
                OrderStatus::Pending,
                OrderStatus::Processing,
                OrderStatus::Failed,
            ],
            OrderStatus::Failed => &[OrderStatus::Pending, OrderStatus::Processing],
            OrderStatus::Refunded | OrderStatus::PartiallyRefunded => {
                &[OrderStatus::Completed, OrderStatus::PartiallyRefunded]
            }
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        target.allowed_predecessors().contains(self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus::new("order", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub catalog_id: Option<Uuid>,
    pub status: OrderStatus,
    pub subtotal: i64,
    pub tax: i64,
    pub tip: i64,
    pub total: i64,
    pub amount_refunded: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub payment_intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A new pending order awaiting payment. The total is derived so the
    /// amounts can never disagree.
    pub fn new(
        organization_id: Uuid,
        catalog_id: Option<Uuid>,
        subtotal: i64,
        tax: i64,
        tip: i64,
        currency: impl Into<String>,
        payment_intent_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            catalog_id,
            status: OrderStatus::Pending,
            subtotal,
            tax,
            tip,
            total: subtotal + tax + tip,
            amount_refunded: 0,
            currency: currency.into(),
            customer_email: None,
            payment_intent_id,
            charge_id: None,
            failure_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }
}

/// Processor correlation id an event addresses an order by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    PaymentIntent(String),
    Charge(String),
}

impl OrderKey {
    pub fn as_str(&self) -> &str {
        match self {
            OrderKey::PaymentIntent(id) | OrderKey::Charge(id) => id,
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKey::PaymentIntent(id) => write!(f, "payment_intent:{}", id),
            OrderKey::Charge(id) => write!(f, "charge:{}", id),
        }
    }
}

/// A single guarded status write derived from one processor event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTransition {
    Processing {
        key: OrderKey,
    },
    Succeeded {
        key: OrderKey,
        charge_id: Option<String>,
    },
    Failed {
        key: OrderKey,
        failure_message: Option<String>,
    },
    /// Resolves to `Refunded` or `PartiallyRefunded` against the stored total
    /// inside the same write.
    Refunded {
        key: OrderKey,
        amount_refunded: i64,
    },
}

impl OrderTransition {
    pub fn key(&self) -> &OrderKey {
        match self {
            OrderTransition::Processing { key }
            | OrderTransition::Succeeded { key, .. }
            | OrderTransition::Failed { key, .. }
            | OrderTransition::Refunded { key, .. } => key,
        }
    }

    /// Guard set for the write. Both refund outcomes share one set.
    pub fn allowed_from(&self) -> &'static [OrderStatus] {
        match self {
            OrderTransition::Processing { .. } => OrderStatus::Processing.allowed_predecessors(),
            OrderTransition::Succeeded { .. } => OrderStatus::Completed.allowed_predecessors(),
            OrderTransition::Failed { .. } => OrderStatus::Failed.allowed_predecessors(),
            OrderTransition::Refunded { .. } => OrderStatus::Refunded.allowed_predecessors(),
        }
    }

    /// Applies the transition to an in-memory order, mirroring the SQL write.
    /// Returns `false` without touching the order when the guard rejects it.
    pub fn apply_to(&self, order: &mut Order) -> bool {
        if !self.allowed_from().contains(&order.status) {
            return false;
        }
        if let OrderTransition::Refunded {
            amount_refunded, ..
        } = self
        {
            // Refund amounts are cumulative; a smaller one is stale.
            if *amount_refunded <= order.amount_refunded {
                return false;
            }
        }

        match self {
            OrderTransition::Processing { .. } => {
                order.status = OrderStatus::Processing;
            }
            OrderTransition::Succeeded { charge_id, .. } => {
                order.status = OrderStatus::Completed;
                order.failure_message = None;
                if order.charge_id.is_none() {
                    order.charge_id = charge_id.clone();
                }
            }
            OrderTransition::Failed {
                failure_message, ..
            } => {
                order.status = OrderStatus::Failed;
                order.failure_message = failure_message.clone();
            }
            OrderTransition::Refunded {
                amount_refunded, ..
            } => {
                order.status = refund_status(*amount_refunded, order.total);
                order.amount_refunded = *amount_refunded;
            }
        }
        order.updated_at = Utc::now();
        true
    }
}

/// Fully refunded once the refunded amount covers the order total.
pub fn refund_status(amount_refunded: i64, total: i64) -> OrderStatus {
    if amount_refunded >= total {
        OrderStatus::Refunded
    } else {
        OrderStatus::PartiallyRefunded
    }
}
