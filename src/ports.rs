//! Ports: the storage and outbound interfaces the core depends on.
//! Postgres and in-process implementations live in `adapters`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::distribution::MemberShare;
use crate::jobs::NotificationJob;
use crate::domain::{
    AccountSnapshot, MerchantAccount, Order, OrderTransition, Payout, PayoutUpsert, RevenueSplit,
    TipPool, TipPoolMember, UnknownStatus,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<UnknownStatus> for RepositoryError {
    fn from(e: UnknownStatus) -> Self {
        RepositoryError::Corrupt(e.to_string())
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> RepositoryResult<Order>;

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> RepositoryResult<Option<Order>>;

    /// Single guarded write keyed by the processor id. `None` when no order
    /// matched or the current status does not allow the transition.
    async fn apply_transition(&self, transition: &OrderTransition) -> RepositoryResult<Option<Order>>;

    /// Sum of tips on completed orders for the organization, inclusive dates.
    async fn completed_tip_total(
        &self,
        organization_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<i64>;

    /// Sum of subtotals on the organization's completed orders for the
    /// catalog, inclusive dates.
    async fn completed_gross_for_catalog(
        &self,
        organization_id: Uuid,
        catalog_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<i64>;
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    /// Insert-or-update on `processor_ref`, guarded by the payout status
    /// rules. `None` when an existing row rejected the update.
    async fn upsert(&self, upsert: &PayoutUpsert) -> RepositoryResult<Option<Payout>>;

    async fn latest_for_account(&self, processor_account_id: &str) -> RepositoryResult<Option<Payout>>;
}

#[async_trait]
pub trait MerchantAccountRepository: Send + Sync {
    async fn find_by_organization(&self, organization_id: Uuid) -> RepositoryResult<Option<MerchantAccount>>;

    async fn find_by_processor_account(
        &self,
        processor_account_id: &str,
    ) -> RepositoryResult<Option<MerchantAccount>>;

    /// Writes the full snapshot in one transaction together with the payout
    /// health derived from the latest payout, and stamps `last_synced_at`.
    ///
    /// `read_at` is the `updated_at` of the row the snapshot was fetched
    /// against. The pending-sync marker is cleared only if the row has not
    /// changed since then; `None` clears it unconditionally.
    async fn upsert_snapshot(
        &self,
        organization_id: Uuid,
        snapshot: &AccountSnapshot,
        read_at: Option<DateTime<Utc>>,
    ) -> RepositoryResult<MerchantAccount>;

    /// Recomputes payout health from the latest payout. `None` for an
    /// unknown account.
    async fn refresh_payout_health(
        &self,
        processor_account_id: &str,
    ) -> RepositoryResult<Option<MerchantAccount>>;

    /// Returns whether an account row was marked.
    async fn mark_pending_sync(&self, processor_account_id: &str) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> RepositoryResult<bool>;

    /// Returns `false` when the event id was already recorded.
    async fn record_processed(
        &self,
        event_id: &str,
        event_type: &str,
        processor_account_id: Option<&str>,
    ) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait RevenueSplitRepository: Send + Sync {
    async fn insert(&self, split: &RevenueSplit) -> RepositoryResult<RevenueSplit>;

    /// Active splits in stable order (`created_at`, `id`).
    async fn active_for_catalog(&self, catalog_id: Uuid) -> RepositoryResult<Vec<RevenueSplit>>;
}

#[async_trait]
pub trait TipPoolRepository: Send + Sync {
    async fn insert_pool(&self, pool: &TipPool) -> RepositoryResult<TipPool>;

    async fn get_pool(&self, pool_id: Uuid) -> RepositoryResult<Option<TipPool>>;

    /// Adds a member and drops a calculated pool back to draft. Rejected
    /// with `Conflict` once the pool is finalized.
    async fn insert_member(&self, member: &TipPoolMember) -> RepositoryResult<TipPoolMember>;

    /// Members in stable order (`created_at`, `id`).
    async fn members(&self, pool_id: Uuid) -> RepositoryResult<Vec<TipPoolMember>>;

    /// Overwrites every member's share and marks the pool calculated, in one
    /// transaction. `Conflict` if the pool is finalized or the member set
    /// changed since the shares were computed.
    async fn save_calculation(&self, pool_id: Uuid, shares: &[MemberShare]) -> RepositoryResult<TipPool>;

    /// Moves a calculated pool to finalized. `None` if it was not calculated.
    async fn finalize(&self, pool_id: Uuid) -> RepositoryResult<Option<TipPool>>;
}

/// Outbound notification delivery (email rendering lives behind this).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &NotificationJob) -> anyhow::Result<()>;
}
