//! Typed job payloads and the queues they travel on.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queue::{EnqueueOptions, Job, JobId, JobQueue, QueueError};
use super::JobError;

pub const NOTIFICATIONS_QUEUE: &str = "notifications";
pub const TRANSFERS_QUEUE: &str = "transfers";

/// A payload bound to a named queue.
pub trait QueuedJob: Serialize + DeserializeOwned + Send + Sync {
    const QUEUE: &'static str;
}

/// Fire-and-forget notification, rendered and delivered elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    #[serde(rename = "type")]
    pub kind: String,
    pub to: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl QueuedJob for NotificationJob {
    const QUEUE: &'static str = NOTIFICATIONS_QUEUE;
}

/// Internal fund movement to a connected account. Re-runnable: the
/// processor deduplicates on `idempotency_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferJob {
    /// Tip pool or order the money comes from.
    pub source_id: String,
    pub amount: i64,
    /// Destination processor account.
    pub recipient_ref: String,
    pub currency: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
}

impl QueuedJob for TransferJob {
    const QUEUE: &'static str = TRANSFERS_QUEUE;
}

impl TransferJob {
    pub fn tip_payout(
        pool_id: Uuid,
        member_id: Uuid,
        organization_id: Uuid,
        recipient: &str,
        amount: i64,
        currency: &str,
    ) -> Self {
        Self {
            source_id: pool_id.to_string(),
            amount,
            recipient_ref: recipient.to_string(),
            currency: currency.to_string(),
            idempotency_key: format!("tip:{}:{}", pool_id, member_id),
            organization_id: Some(organization_id),
        }
    }

    pub fn revenue_split(
        order_id: Uuid,
        split_id: Uuid,
        organization_id: Uuid,
        recipient: &str,
        amount: i64,
        currency: &str,
    ) -> Self {
        Self {
            source_id: order_id.to_string(),
            amount,
            recipient_ref: recipient.to_string(),
            currency: currency.to_string(),
            idempotency_key: format!("split:{}:{}", order_id, split_id),
            organization_id: Some(organization_id),
        }
    }
}

pub async fn enqueue<J: QueuedJob>(
    queue: &dyn JobQueue,
    job: &J,
    options: EnqueueOptions,
) -> Result<JobId, QueueError> {
    let payload = serde_json::to_value(job)?;
    queue.enqueue(J::QUEUE, payload, options).await
}

impl Job {
    /// Decodes the payload. A payload that does not decode will never
    /// succeed, so it is a permanent failure.
    pub fn payload_as<J: QueuedJob>(&self) -> Result<J, JobError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| JobError::Permanent(format!("invalid {} payload: {}", J::QUEUE, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_wire_shape() {
        let job = NotificationJob {
            kind: "order_receipt".to_string(),
            to: "guest@example.com".to_string(),
            data: json!({"order_id": "o_1"}),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "order_receipt");
        assert_eq!(value["to"], "guest@example.com");
    }

    #[test]
    fn test_idempotency_keys_are_stable() {
        let pool = Uuid::new_v4();
        let member = Uuid::new_v4();
        let org = Uuid::new_v4();
        let a = TransferJob::tip_payout(pool, member, org, "acct_1", 100, "usd");
        let b = TransferJob::tip_payout(pool, member, org, "acct_1", 100, "usd");
        assert_eq!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.idempotency_key, format!("tip:{}:{}", pool, member));

        let split = TransferJob::revenue_split(pool, member, org, "acct_2", 50, "usd");
        assert!(split.idempotency_key.starts_with("split:"));
    }
}
