use serde_json::json;
use std::sync::Arc;

use crate::domain::{Payout, PayoutKind, PayoutStatus, PayoutUpsert};
use crate::ports::{MerchantAccountRepository, PayoutRepository, RepositoryResult};
use crate::processor::{PayoutObject, TransferObject};
use crate::realtime::{RealtimeEvent, RealtimeHub, PAYOUT_UPDATED};

pub const TRANSFER_REVERSED: &str = "transfer_reversed";

/// Records payout and transfer state reported by the processor and keeps
/// the owning account's payout health current.
pub struct PayoutService {
    payouts: Arc<dyn PayoutRepository>,
    accounts: Arc<dyn MerchantAccountRepository>,
    realtime: RealtimeHub,
}

impl PayoutService {
    pub fn new(
        payouts: Arc<dyn PayoutRepository>,
        accounts: Arc<dyn MerchantAccountRepository>,
        realtime: RealtimeHub,
    ) -> Self {
        Self {
            payouts,
            accounts,
            realtime,
        }
    }

    /// `payout.*` for a connected account. `None` when the status is not
    /// one we track or the stored payout already moved past it.
    pub async fn record_payout(
        &self,
        processor_account_id: Option<&str>,
        payout: &PayoutObject,
    ) -> RepositoryResult<Option<Payout>> {
        let Some(status) = PayoutStatus::from_processor(&payout.status) else {
            tracing::info!(
                payout_id = %payout.id,
                status = %payout.status,
                "Ignoring untracked payout status"
            );
            return Ok(None);
        };

        let organization_id = match processor_account_id {
            Some(id) => self
                .accounts
                .find_by_processor_account(id)
                .await?
                .map(|a| a.organization_id),
            None => None,
        };

        let upsert = PayoutUpsert {
            processor_ref: payout.id.clone(),
            kind: PayoutKind::Payout,
            organization_id,
            processor_account_id: processor_account_id.map(str::to_string),
            amount: payout.amount,
            currency: payout.currency.clone(),
            status,
            destination: payout.destination.clone(),
            failure_code: payout.failure_code.clone(),
            failure_message: payout.failure_message.clone(),
            source_ref: None,
            processor_created_at: payout.created_at(),
        };

        let Some(stored) = self.payouts.upsert(&upsert).await? else {
            tracing::info!(
                payout_id = %payout.id,
                status = %status,
                "Payout update rejected by status guard"
            );
            return Ok(None);
        };

        if let Some(account_id) = processor_account_id {
            self.refresh_health(account_id).await?;
        }
        Ok(Some(stored))
    }

    /// `transfer.reversed`: the transfer row is marked failed so the money
    /// shows as not delivered.
    pub async fn record_transfer_reversal(&self, transfer: &TransferObject) -> RepositoryResult<Option<Payout>> {
        let upsert = PayoutUpsert {
            processor_ref: transfer.id.clone(),
            kind: PayoutKind::Transfer,
            organization_id: None,
            processor_account_id: Some(transfer.destination.clone()),
            amount: transfer.amount,
            currency: transfer.currency.clone(),
            status: PayoutStatus::Failed,
            destination: Some(transfer.destination.clone()),
            failure_code: Some(TRANSFER_REVERSED.to_string()),
            failure_message: None,
            source_ref: transfer.transfer_group.clone(),
            processor_created_at: None,
        };

        let stored = self.payouts.upsert(&upsert).await?;
        if stored.is_some() {
            tracing::warn!(
                transfer_id = %transfer.id,
                amount_reversed = transfer.amount_reversed,
                "Transfer reversed"
            );
        }
        Ok(stored)
    }

    async fn refresh_health(&self, processor_account_id: &str) -> RepositoryResult<()> {
        let Some(account) = self.accounts.refresh_payout_health(processor_account_id).await? else {
            return Ok(());
        };
        if account.payout_health.is_undeliverable() {
            tracing::warn!(
                organization_id = %account.organization_id,
                processor_account_id = %processor_account_id,
                "Payouts undeliverable to the bank account on file"
            );
        }
        self.realtime.publish(RealtimeEvent::new(
            account.organization_id,
            PAYOUT_UPDATED,
            json!({
                "processor_account_id": processor_account_id,
                "payout_status": account.payout_health.status,
                "failure_code": account.payout_health.failure_code,
                "failure_message": account.payout_health.failure_message,
            }),
        ));
        Ok(())
    }
}
