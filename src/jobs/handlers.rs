//! Handlers for the side-effect queues.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::dispatcher::JobHandler;
use super::payloads::{NotificationJob, TransferJob};
use super::queue::Job;
use super::JobError;
use crate::domain::{PayoutKind, PayoutStatus, PayoutUpsert};
use crate::ports::{NotificationSink, PayoutRepository};
use crate::processor::{PaymentProcessor, ProcessorError, TransferRequest};

pub struct NotificationHandler {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationHandler {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let notification: NotificationJob = job.payload_as()?;
        self.sink
            .send(&notification)
            .await
            .map_err(|e| JobError::Retryable(format!("notification send failed: {}", e)))
    }
}

/// Moves money to a connected account and records it as a transfer payout.
pub struct TransferHandler {
    processor: Arc<dyn PaymentProcessor>,
    payouts: Arc<dyn PayoutRepository>,
}

impl TransferHandler {
    pub fn new(processor: Arc<dyn PaymentProcessor>, payouts: Arc<dyn PayoutRepository>) -> Self {
        Self { processor, payouts }
    }
}

fn classify(e: ProcessorError) -> JobError {
    if e.is_transient() {
        JobError::Retryable(e.to_string())
    } else {
        JobError::Permanent(e.to_string())
    }
}

#[async_trait]
impl JobHandler for TransferHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let transfer: TransferJob = job.payload_as()?;
        if transfer.amount <= 0 {
            info!(
                idempotency_key = %transfer.idempotency_key,
                amount = transfer.amount,
                "Skipping transfer with nothing to move"
            );
            return Ok(());
        }

        let receipt = self
            .processor
            .create_transfer(&TransferRequest {
                amount: transfer.amount,
                currency: transfer.currency.clone(),
                destination: transfer.recipient_ref.clone(),
                idempotency_key: transfer.idempotency_key.clone(),
                source_ref: Some(transfer.source_id.clone()),
            })
            .await
            .map_err(classify)?;

        // A retry after this point re-posts the transfer; the processor
        // returns the same transfer for the same idempotency key.
        self.payouts
            .upsert(&PayoutUpsert {
                processor_ref: receipt.transfer_id.clone(),
                kind: PayoutKind::Transfer,
                organization_id: transfer.organization_id,
                processor_account_id: Some(receipt.destination.clone()),
                amount: receipt.amount,
                currency: receipt.currency,
                status: PayoutStatus::Paid,
                destination: Some(receipt.destination),
                failure_code: None,
                failure_message: None,
                source_ref: Some(transfer.source_id),
                processor_created_at: None,
            })
            .await
            .map_err(|e| JobError::Retryable(format!("failed to record transfer: {}", e)))?;

        info!(
            transfer_id = %receipt.transfer_id,
            idempotency_key = %transfer.idempotency_key,
            amount = transfer.amount,
            "Transfer created"
        );
        Ok(())
    }
}
