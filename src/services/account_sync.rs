//! Keeps the local merchant account row eventually consistent with the
//! processor, either on demand or from `account.*` events.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::MerchantAccount;
use crate::ports::{MerchantAccountRepository, RepositoryError, RepositoryResult};
use crate::processor::{AccountObject, PaymentProcessor, ProcessorError};
use crate::realtime::{RealtimeEvent, RealtimeHub, ACCOUNT_UPDATED};

pub const DEFAULT_SYNC_TTL_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Organization {0} has no merchant account")]
    NotConnected(Uuid),

    #[error("Processor unavailable: {0}")]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Merchant account as served to callers. `stale` is set when a refresh
/// was due but the processor could not be reached.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    #[serde(flatten)]
    pub account: MerchantAccount,
    pub stale: bool,
}

pub struct AccountSyncService {
    accounts: Arc<dyn MerchantAccountRepository>,
    processor: Arc<dyn PaymentProcessor>,
    realtime: RealtimeHub,
    ttl: Duration,
}

impl AccountSyncService {
    pub fn new(
        accounts: Arc<dyn MerchantAccountRepository>,
        processor: Arc<dyn PaymentProcessor>,
        realtime: RealtimeHub,
        ttl: Duration,
    ) -> Self {
        Self {
            accounts,
            processor,
            realtime,
            ttl,
        }
    }

    /// Cached status unless `force`, the pending-sync marker is set, or the
    /// cache is older than the TTL. A failed pull serves the cache flagged
    /// stale; it is an error only when nothing was ever synced.
    pub async fn get_status(&self, organization_id: Uuid, force: bool) -> Result<AccountStatus, SyncError> {
        let cached = self
            .accounts
            .find_by_organization(organization_id)
            .await?
            .ok_or(SyncError::NotConnected(organization_id))?;

        if !force && !cached.needs_refresh(Utc::now(), self.ttl) {
            return Ok(AccountStatus {
                account: cached,
                stale: false,
            });
        }

        match self.processor.retrieve_account(&cached.processor_account_id).await {
            Ok(snapshot) => {
                let account = self
                    .accounts
                    .upsert_snapshot(organization_id, &snapshot, Some(cached.updated_at))
                    .await?;
                tracing::info!(
                    organization_id = %organization_id,
                    processor_account_id = %account.processor_account_id,
                    onboarding_state = %account.onboarding_state,
                    "Merchant account synced"
                );
                self.publish(&account);
                Ok(AccountStatus {
                    account,
                    stale: false,
                })
            }
            Err(e) if cached.last_synced_at.is_some() => {
                tracing::warn!(
                    organization_id = %organization_id,
                    error = %e,
                    "Account refresh failed, serving cached status"
                );
                Ok(AccountStatus {
                    account: cached,
                    stale: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Creates the processor account on first use, then a hosted
    /// onboarding link. The account is marked for re-sync because the user
    /// is about to change it outside this service.
    pub async fn create_onboarding_link(
        &self,
        organization_id: Uuid,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, SyncError> {
        let processor_account_id = match self.accounts.find_by_organization(organization_id).await? {
            Some(account) => account.processor_account_id,
            None => {
                let snapshot = self.processor.create_account(organization_id).await?;
                let account = self
                    .accounts
                    .upsert_snapshot(organization_id, &snapshot, None)
                    .await?;
                tracing::info!(
                    organization_id = %organization_id,
                    processor_account_id = %account.processor_account_id,
                    "Created processor account"
                );
                account.processor_account_id
            }
        };

        let url = self
            .processor
            .create_account_link(&processor_account_id, refresh_url, return_url)
            .await?;
        self.accounts.mark_pending_sync(&processor_account_id).await?;
        Ok(url)
    }

    /// `account.updated`: resolves the organization from the stored row,
    /// falling back to the metadata we tagged the account with.
    pub async fn sync_from_event(&self, account: &AccountObject) -> RepositoryResult<Option<MerchantAccount>> {
        let stored = self.accounts.find_by_processor_account(&account.id).await?;
        let read_at = stored.as_ref().map(|a| a.updated_at);
        let Some(organization_id) = stored
            .map(|a| a.organization_id)
            .or_else(|| account.organization_id())
        else {
            tracing::info!(
                processor_account_id = %account.id,
                "account.updated for an unknown account"
            );
            return Ok(None);
        };

        let snapshot = account.clone().into_snapshot();
        match self
            .accounts
            .upsert_snapshot(organization_id, &snapshot, read_at)
            .await
        {
            Ok(updated) => {
                self.publish(&updated);
                Ok(Some(updated))
            }
            Err(RepositoryError::Conflict(reason)) => {
                tracing::warn!(
                    processor_account_id = %account.id,
                    organization_id = %organization_id,
                    reason = %reason,
                    "Skipping account snapshot"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// External account changes arrive without the full account; the next
    /// status check pulls it.
    pub async fn mark_pending(&self, processor_account_id: &str) -> RepositoryResult<bool> {
        let marked = self.accounts.mark_pending_sync(processor_account_id).await?;
        if !marked {
            tracing::info!(
                processor_account_id = %processor_account_id,
                "No local account to mark for sync"
            );
        }
        Ok(marked)
    }

    fn publish(&self, account: &MerchantAccount) {
        self.realtime.publish(RealtimeEvent::new(
            account.organization_id,
            ACCOUNT_UPDATED,
            json!({
                "processor_account_id": account.processor_account_id,
                "onboarding_state": account.onboarding_state,
                "charges_enabled": account.charges_enabled,
                "payouts_enabled": account.payouts_enabled,
                "payout_status": account.payout_health.status,
            }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::{AccountSnapshot, OnboardingState, Requirements};
    use crate::processor::{TransferReceipt, TransferRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeProcessor {
        snapshot: Mutex<Option<AccountSnapshot>>,
        pulls: Mutex<u32>,
        // Marks the account pending while the next pull is in flight.
        mark_during_pull: Mutex<Option<Arc<MemoryStore>>>,
    }

    impl FakeProcessor {
        fn returning(snapshot: Option<AccountSnapshot>) -> Self {
            Self {
                snapshot: Mutex::new(snapshot),
                pulls: Mutex::new(0),
                mark_during_pull: Mutex::new(None),
            }
        }

        fn pulls(&self) -> u32 {
            *self.pulls.lock().unwrap()
        }
    }

    #[async_trait]
    impl PaymentProcessor for FakeProcessor {
        async fn retrieve_account(&self, id: &str) -> Result<AccountSnapshot, ProcessorError> {
            *self.pulls.lock().unwrap() += 1;
            let marker = self.mark_during_pull.lock().unwrap().take();
            if let Some(store) = marker {
                store.mark_pending_sync(id).await.unwrap();
            }
            self.snapshot
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ProcessorError::CircuitBreakerOpen("down".to_string()))
        }

        async fn create_account(&self, _org: Uuid) -> Result<AccountSnapshot, ProcessorError> {
            Ok(snapshot("acct_new", false))
        }

        async fn create_account_link(&self, id: &str, _r: &str, _u: &str) -> Result<String, ProcessorError> {
            Ok(format!("https://connect.example/{}", id))
        }

        async fn create_transfer(&self, _request: &TransferRequest) -> Result<TransferReceipt, ProcessorError> {
            Err(ProcessorError::NotFound("transfers".to_string()))
        }
    }

    fn snapshot(id: &str, active: bool) -> AccountSnapshot {
        AccountSnapshot {
            processor_account_id: id.to_string(),
            charges_enabled: active,
            payouts_enabled: active,
            details_submitted: active,
            requirements: Requirements::default(),
            external_account: None,
        }
    }

    fn service(store: Arc<MemoryStore>, processor: Arc<FakeProcessor>, ttl_secs: i64) -> AccountSyncService {
        AccountSyncService::new(store, processor, RealtimeHub::new(8), Duration::seconds(ttl_secs))
    }

    #[tokio::test]
    async fn test_fresh_cache_is_served_without_a_pull() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        store.upsert_snapshot(org, &snapshot("acct_1", true), None).await.unwrap();
        let processor = Arc::new(FakeProcessor::returning(Some(snapshot("acct_1", true))));

        let status = service(store, processor.clone(), 300).get_status(org, false).await.unwrap();
        assert!(!status.stale);
        assert_eq!(status.account.onboarding_state, OnboardingState::Active);
        assert_eq!(processor.pulls(), 0);
    }

    #[tokio::test]
    async fn test_force_pulls_from_processor() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        store.upsert_snapshot(org, &snapshot("acct_1", false), None).await.unwrap();
        let processor = Arc::new(FakeProcessor::returning(Some(snapshot("acct_1", true))));

        let status = service(store, processor.clone(), 300).get_status(org, true).await.unwrap();
        assert_eq!(processor.pulls(), 1);
        assert_eq!(status.account.onboarding_state, OnboardingState::Active);
    }

    #[tokio::test]
    async fn test_failed_pull_serves_stale_cache() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        store.upsert_snapshot(org, &snapshot("acct_1", true), None).await.unwrap();
        store.mark_pending_sync("acct_1").await.unwrap();
        let processor = Arc::new(FakeProcessor::returning(None));

        let status = service(store, processor, 300).get_status(org, false).await.unwrap();
        assert!(status.stale);
        assert!(status.account.pending_stale_sync);
    }

    #[tokio::test]
    async fn test_marker_set_during_pull_survives_the_write() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        store.upsert_snapshot(org, &snapshot("acct_1", true), None).await.unwrap();
        let processor = Arc::new(FakeProcessor::returning(Some(snapshot("acct_1", true))));
        *processor.mark_during_pull.lock().unwrap() = Some(store.clone());
        let service = service(store.clone(), processor.clone(), 300);

        let status = service.get_status(org, true).await.unwrap();
        assert!(status.account.pending_stale_sync);

        // The surviving marker forces the next read to pull again, which
        // then clears it.
        let status = service.get_status(org, false).await.unwrap();
        assert_eq!(processor.pulls(), 2);
        assert!(!status.account.pending_stale_sync);
    }

    #[tokio::test]
    async fn test_unknown_organization_is_not_connected() {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(FakeProcessor::returning(None));
        let result = service(store, processor, 300).get_status(Uuid::new_v4(), false).await;
        assert!(matches!(result, Err(SyncError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_onboarding_link_creates_account_and_marks_pending() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        let processor = Arc::new(FakeProcessor::returning(None));

        let url = service(store.clone(), processor, 300)
            .create_onboarding_link(org, "https://app/refresh", "https://app/return")
            .await
            .unwrap();
        assert_eq!(url, "https://connect.example/acct_new");

        let account = store.find_by_organization(org).await.unwrap().unwrap();
        assert!(account.pending_stale_sync);
        assert_eq!(account.onboarding_state, OnboardingState::NotStarted);
    }

    #[tokio::test]
    async fn test_event_for_unknown_account_uses_metadata() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        let processor = Arc::new(FakeProcessor::returning(None));
        let account: AccountObject = serde_json::from_value(serde_json::json!({
            "id": "acct_9",
            "details_submitted": true,
            "metadata": {"organization_id": org.to_string()}
        }))
        .unwrap();

        let synced = service(store, processor, 300).sync_from_event(&account).await.unwrap().unwrap();
        assert_eq!(synced.organization_id, org);
        assert_eq!(synced.onboarding_state, OnboardingState::PendingVerification);
    }

    #[tokio::test]
    async fn test_event_without_organization_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(FakeProcessor::returning(None));
        let account: AccountObject = serde_json::from_value(serde_json::json!({"id": "acct_x"})).unwrap();

        assert!(service(store, processor, 300).sync_from_event(&account).await.unwrap().is_none());
    }
}
