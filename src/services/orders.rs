use serde_json::json;
use std::sync::Arc;

use crate::distribution::compute_revenue_split;
use crate::domain::{Order, OrderTransition, RevenueSplit};
use crate::jobs::{enqueue, EnqueueOptions, JobQueue, NotificationJob, TransferJob};
use crate::ports::{OrderRepository, RepositoryResult, RevenueSplitRepository};
use crate::realtime::{RealtimeEvent, RealtimeHub, ORDER_COMPLETED, ORDER_REFUNDED, PAYMENT_FAILED};

pub const RECEIPT_NOTIFICATION: &str = "order_receipt";

/// Drives orders through their payment lifecycle and fans out the
/// follow-up work once a write actually lands.
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    splits: Arc<dyn RevenueSplitRepository>,
    jobs: Arc<dyn JobQueue>,
    realtime: RealtimeHub,
    job_options: EnqueueOptions,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        splits: Arc<dyn RevenueSplitRepository>,
        jobs: Arc<dyn JobQueue>,
        realtime: RealtimeHub,
        job_options: EnqueueOptions,
    ) -> Self {
        Self {
            orders,
            splits,
            jobs,
            realtime,
            job_options,
        }
    }

    /// Applies one guarded transition. `None` when nothing changed: the
    /// order is unknown, the event is a replay, or the guard rejected it.
    /// Side-effect failures are logged and never fail the write.
    pub async fn apply(&self, transition: &OrderTransition) -> RepositoryResult<Option<Order>> {
        let Some(order) = self.orders.apply_transition(transition).await? else {
            tracing::info!(
                key = %transition.key(),
                "Order transition skipped: no order in an allowed state"
            );
            return Ok(None);
        };

        tracing::info!(
            order_id = %order.id,
            status = %order.status,
            "Order status updated"
        );

        match transition {
            OrderTransition::Processing { .. } => {}
            OrderTransition::Succeeded { .. } => {
                self.publish(&order, ORDER_COMPLETED);
                self.enqueue_receipt(&order).await;
                self.enqueue_split_transfers(&order).await;
            }
            OrderTransition::Failed { .. } => self.publish(&order, PAYMENT_FAILED),
            OrderTransition::Refunded { .. } => self.publish(&order, ORDER_REFUNDED),
        }

        Ok(Some(order))
    }

    fn publish(&self, order: &Order, event: &str) {
        self.realtime.publish(RealtimeEvent::new(
            order.organization_id,
            event,
            json!({
                "order_id": order.id,
                "status": order.status,
                "total": order.total,
                "amount_refunded": order.amount_refunded,
                "currency": order.currency,
                "failure_message": order.failure_message,
            }),
        ));
    }

    async fn enqueue_receipt(&self, order: &Order) {
        let Some(email) = order.customer_email.as_deref() else {
            return;
        };
        let job = NotificationJob {
            kind: RECEIPT_NOTIFICATION.to_string(),
            to: email.to_string(),
            data: json!({
                "order_id": order.id,
                "subtotal": order.subtotal,
                "tax": order.tax,
                "tip": order.tip,
                "total": order.total,
                "currency": order.currency,
            }),
        };
        if let Err(e) = enqueue(self.jobs.as_ref(), &job, self.job_options).await {
            tracing::warn!(order_id = %order.id, error = %e, "Failed to enqueue receipt");
        }
    }

    async fn enqueue_split_transfers(&self, order: &Order) {
        let Some(catalog_id) = order.catalog_id else {
            return;
        };
        let splits = match self.splits.active_for_catalog(catalog_id).await {
            Ok(splits) => splits,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Failed to load revenue splits");
                return;
            }
        };
        if splits.is_empty() {
            return;
        }

        let jobs = match split_transfers(order, &splits) {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Revenue split rejected");
                return;
            }
        };

        for job in jobs {
            if let Err(e) = enqueue(self.jobs.as_ref(), &job, self.job_options).await {
                tracing::warn!(
                    order_id = %order.id,
                    idempotency_key = %job.idempotency_key,
                    error = %e,
                    "Failed to enqueue split transfer"
                );
            }
        }
    }
}

/// One transfer per split that has a recipient account and a non-zero
/// amount. Every active split takes part in the allocation so capping
/// behaves the same as in the report.
fn split_transfers(
    order: &Order,
    splits: &[RevenueSplit],
) -> Result<Vec<TransferJob>, crate::distribution::DistributionError> {
    let inputs = splits
        .iter()
        .map(RevenueSplit::to_input)
        .collect::<Result<Vec<_>, _>>()?;
    let report = compute_revenue_split(order.subtotal, &inputs)?;

    Ok(splits
        .iter()
        .zip(report.splits.iter())
        .filter(|(_, allocation)| allocation.amount > 0)
        .filter_map(|(split, allocation)| {
            let recipient = split.recipient_account_id.as_deref()?;
            Some(TransferJob::revenue_split(
                order.id,
                split.id,
                order.organization_id,
                recipient,
                allocation.amount,
                &order.currency,
            ))
        })
        .collect())
}
