//! In-process implementation of every storage port. Applies the same guards
//! as the SQL writes; used by tests and by `serve --in-memory`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::distribution::MemberShare;
use crate::domain::{
    payout_health, AccountSnapshot, MerchantAccount, Order, OrderKey, OrderStatus,
    OrderTransition, Payout, PayoutKind, PayoutUpsert, RevenueSplit, TipPool, TipPoolMember,
    TipPoolStatus,
};
use crate::ports::{
    MerchantAccountRepository, OrderRepository, PayoutRepository, RepositoryError,
    RepositoryResult, RevenueSplitRepository, TipPoolRepository, WebhookEventRepository,
};

#[derive(Default)]
struct State {
    orders: Vec<Order>,
    payouts: Vec<Payout>,
    accounts: Vec<MerchantAccount>,
    webhook_events: HashMap<String, String>,
    splits: Vec<RevenueSplit>,
    pools: HashMap<Uuid, TipPool>,
    members: Vec<TipPoolMember>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn orders(&self) -> Vec<Order> {
        self.with_state(|s| s.orders.clone())
    }

    pub fn payouts(&self) -> Vec<Payout> {
        self.with_state(|s| s.payouts.clone())
    }

    pub fn processed_event_count(&self) -> usize {
        self.with_state(|s| s.webhook_events.len())
    }
}

fn in_window(order: &Order, start: NaiveDate, end: NaiveDate) -> bool {
    let day = order.created_at.date_naive();
    day >= start && day <= end
}

fn latest_payout<'a>(payouts: &'a [Payout], processor_account_id: &str) -> Option<&'a Payout> {
    payouts
        .iter()
        .filter(|p| p.kind == PayoutKind::Payout)
        .filter(|p| p.processor_account_id.as_deref() == Some(processor_account_id))
        .max_by_key(|p| (p.recency(), p.created_at, p.id))
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, order: &Order) -> RepositoryResult<Order> {
        self.with_state(|s| {
            if let Some(pi) = &order.payment_intent_id {
                if s.orders.iter().any(|o| o.payment_intent_id.as_ref() == Some(pi)) {
                    return Err(RepositoryError::Conflict(format!(
                        "payment intent {} already has an order",
                        pi
                    )));
                }
            }
            s.orders.push(order.clone());
            Ok(order.clone())
        })
    }

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> RepositoryResult<Option<Order>> {
        Ok(self.with_state(|s| {
            s.orders
                .iter()
                .find(|o| o.payment_intent_id.as_deref() == Some(payment_intent_id))
                .cloned()
        }))
    }

    async fn apply_transition(&self, transition: &OrderTransition) -> RepositoryResult<Option<Order>> {
        Ok(self.with_state(|s| {
            let order = s.orders.iter_mut().find(|o| match transition.key() {
                OrderKey::PaymentIntent(id) => o.payment_intent_id.as_deref() == Some(id.as_str()),
                OrderKey::Charge(id) => o.charge_id.as_deref() == Some(id.as_str()),
            })?;
            transition.apply_to(order).then(|| order.clone())
        }))
    }

    async fn completed_tip_total(
        &self,
        organization_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<i64> {
        Ok(self.with_state(|s| {
            s.orders
                .iter()
                .filter(|o| o.organization_id == organization_id)
                .filter(|o| o.status == OrderStatus::Completed && in_window(o, start, end))
                .map(|o| o.tip)
                .sum()
        }))
    }

    async fn completed_gross_for_catalog(
        &self,
        organization_id: Uuid,
        catalog_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<i64> {
        Ok(self.with_state(|s| {
            s.orders
                .iter()
                .filter(|o| o.organization_id == organization_id && o.catalog_id == Some(catalog_id))
                .filter(|o| o.status == OrderStatus::Completed && in_window(o, start, end))
                .map(|o| o.subtotal)
                .sum()
        }))
    }
}

#[async_trait]
impl PayoutRepository for MemoryStore {
    async fn upsert(&self, upsert: &PayoutUpsert) -> RepositoryResult<Option<Payout>> {
        Ok(self.with_state(|s| {
            match s
                .payouts
                .iter_mut()
                .find(|p| p.processor_ref.as_deref() == Some(upsert.processor_ref.as_str()))
            {
                Some(existing) => upsert.apply_to(existing).then(|| existing.clone()),
                None => {
                    let payout = upsert.clone().into_new_payout();
                    s.payouts.push(payout.clone());
                    Some(payout)
                }
            }
        }))
    }

    async fn latest_for_account(&self, processor_account_id: &str) -> RepositoryResult<Option<Payout>> {
        Ok(self.with_state(|s| latest_payout(&s.payouts, processor_account_id).cloned()))
    }
}

#[async_trait]
impl MerchantAccountRepository for MemoryStore {
    async fn find_by_organization(&self, organization_id: Uuid) -> RepositoryResult<Option<MerchantAccount>> {
        Ok(self.with_state(|s| {
            s.accounts
                .iter()
                .find(|a| a.organization_id == organization_id)
                .cloned()
        }))
    }

    async fn find_by_processor_account(
        &self,
        processor_account_id: &str,
    ) -> RepositoryResult<Option<MerchantAccount>> {
        Ok(self.with_state(|s| {
            s.accounts
                .iter()
                .find(|a| a.processor_account_id == processor_account_id)
                .cloned()
        }))
    }

    async fn upsert_snapshot(
        &self,
        organization_id: Uuid,
        snapshot: &AccountSnapshot,
        read_at: Option<DateTime<Utc>>,
    ) -> RepositoryResult<MerchantAccount> {
        self.with_state(|s| {
            let current_external = snapshot.external_account.as_ref().map(|e| e.id.as_str());
            let health = payout_health(
                latest_payout(&s.payouts, &snapshot.processor_account_id),
                current_external,
            );
            let mut fresh =
                MerchantAccount::from_snapshot(organization_id, snapshot.clone(), health, Utc::now());

            let position = s
                .accounts
                .iter()
                .position(|a| a.processor_account_id == snapshot.processor_account_id);
            match position {
                Some(index) => {
                    let existing = &s.accounts[index];
                    fresh.id = existing.id;
                    fresh.organization_id = existing.organization_id;
                    fresh.created_at = existing.created_at;
                    if let Some(read_at) = read_at {
                        fresh.pending_stale_sync =
                            existing.pending_stale_sync && existing.updated_at > read_at;
                    }
                    s.accounts[index] = fresh.clone();
                }
                None => {
                    if s.accounts.iter().any(|a| a.organization_id == organization_id) {
                        return Err(RepositoryError::Conflict(format!(
                            "organization {} already has a merchant account",
                            organization_id
                        )));
                    }
                    s.accounts.push(fresh.clone());
                }
            }
            Ok(fresh)
        })
    }

    async fn refresh_payout_health(
        &self,
        processor_account_id: &str,
    ) -> RepositoryResult<Option<MerchantAccount>> {
        Ok(self.with_state(|s| {
            let health = {
                let account = s
                    .accounts
                    .iter()
                    .find(|a| a.processor_account_id == processor_account_id)?;
                payout_health(
                    latest_payout(&s.payouts, processor_account_id),
                    account.external_account_id(),
                )
            };
            let account = s
                .accounts
                .iter_mut()
                .find(|a| a.processor_account_id == processor_account_id)?;
            account.payout_health = health;
            account.updated_at = Utc::now();
            Some(account.clone())
        }))
    }

    async fn mark_pending_sync(&self, processor_account_id: &str) -> RepositoryResult<bool> {
        Ok(self.with_state(|s| {
            match s
                .accounts
                .iter_mut()
                .find(|a| a.processor_account_id == processor_account_id)
            {
                Some(account) => {
                    account.pending_stale_sync = true;
                    account.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        }))
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryStore {
    async fn is_processed(&self, event_id: &str) -> RepositoryResult<bool> {
        Ok(self.with_state(|s| s.webhook_events.contains_key(event_id)))
    }

    async fn record_processed(
        &self,
        event_id: &str,
        event_type: &str,
        _processor_account_id: Option<&str>,
    ) -> RepositoryResult<bool> {
        Ok(self.with_state(|s| {
            if s.webhook_events.contains_key(event_id) {
                return false;
            }
            s.webhook_events
                .insert(event_id.to_string(), event_type.to_string());
            true
        }))
    }
}

#[async_trait]
impl RevenueSplitRepository for MemoryStore {
    async fn insert(&self, split: &RevenueSplit) -> RepositoryResult<RevenueSplit> {
        self.with_state(|s| s.splits.push(split.clone()));
        Ok(split.clone())
    }

    async fn active_for_catalog(&self, catalog_id: Uuid) -> RepositoryResult<Vec<RevenueSplit>> {
        Ok(self.with_state(|s| {
            let mut splits: Vec<RevenueSplit> = s
                .splits
                .iter()
                .filter(|split| split.catalog_id == catalog_id && split.is_active)
                .cloned()
                .collect();
            splits.sort_by_key(|split| (split.created_at, split.id));
            splits
        }))
    }
}

#[async_trait]
impl TipPoolRepository for MemoryStore {
    async fn insert_pool(&self, pool: &TipPool) -> RepositoryResult<TipPool> {
        self.with_state(|s| s.pools.insert(pool.id, pool.clone()));
        Ok(pool.clone())
    }

    async fn get_pool(&self, pool_id: Uuid) -> RepositoryResult<Option<TipPool>> {
        Ok(self.with_state(|s| s.pools.get(&pool_id).cloned()))
    }

    async fn insert_member(&self, member: &TipPoolMember) -> RepositoryResult<TipPoolMember> {
        self.with_state(|s| {
            let pool = s
                .pools
                .get_mut(&member.tip_pool_id)
                .ok_or_else(|| RepositoryError::NotFound(format!("tip pool {}", member.tip_pool_id)))?;
            match pool.status {
                TipPoolStatus::Finalized => {
                    return Err(RepositoryError::Conflict(format!(
                        "tip pool {} is finalized",
                        pool.id
                    )))
                }
                TipPoolStatus::Calculated => {
                    pool.status = TipPoolStatus::Draft;
                    pool.updated_at = Utc::now();
                }
                TipPoolStatus::Draft => {}
            }
            s.members.push(member.clone());
            Ok(member.clone())
        })
    }

    async fn members(&self, pool_id: Uuid) -> RepositoryResult<Vec<TipPoolMember>> {
        Ok(self.with_state(|s| {
            let mut members: Vec<TipPoolMember> = s
                .members
                .iter()
                .filter(|m| m.tip_pool_id == pool_id)
                .cloned()
                .collect();
            members.sort_by_key(|m| (m.created_at, m.id));
            members
        }))
    }

    async fn save_calculation(&self, pool_id: Uuid, shares: &[MemberShare]) -> RepositoryResult<TipPool> {
        self.with_state(|s| {
            let status = s
                .pools
                .get(&pool_id)
                .map(|p| p.status)
                .ok_or_else(|| RepositoryError::NotFound(format!("tip pool {}", pool_id)))?;
            if status == TipPoolStatus::Finalized {
                return Err(RepositoryError::Conflict(format!("tip pool {} is finalized", pool_id)));
            }

            let stored: HashSet<Uuid> = s
                .members
                .iter()
                .filter(|m| m.tip_pool_id == pool_id)
                .map(|m| m.id)
                .collect();
            let computed: HashSet<Uuid> = shares.iter().map(|share| share.member_id).collect();
            if stored != computed {
                return Err(RepositoryError::Conflict(format!(
                    "tip pool {} members changed during calculation",
                    pool_id
                )));
            }

            let by_member: HashMap<Uuid, i64> =
                shares.iter().map(|share| (share.member_id, share.share)).collect();
            for member in s.members.iter_mut().filter(|m| m.tip_pool_id == pool_id) {
                let share = by_member.get(&member.id).copied();
                member.pool_share = share;
                member.final_amount = share;
            }

            let now = Utc::now();
            let pool = s
                .pools
                .get_mut(&pool_id)
                .ok_or_else(|| RepositoryError::NotFound(format!("tip pool {}", pool_id)))?;
            pool.status = TipPoolStatus::Calculated;
            pool.calculated_at = Some(now);
            pool.updated_at = now;
            Ok(pool.clone())
        })
    }

    async fn finalize(&self, pool_id: Uuid) -> RepositoryResult<Option<TipPool>> {
        Ok(self.with_state(|s| {
            let pool = s.pools.get_mut(&pool_id)?;
            if pool.status != TipPoolStatus::Calculated {
                return None;
            }
            let now = Utc::now();
            pool.status = TipPoolStatus::Finalized;
            pool.finalized_at = Some(now);
            pool.updated_at = now;
            Some(pool.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PayoutStatus, Requirements};
    use bigdecimal::BigDecimal;

    fn order_with_intent(pi: &str) -> Order {
        Order::new(Uuid::new_v4(), None, 1000, 0, 100, "usd", Some(pi.to_string()))
    }

    #[tokio::test]
    async fn test_guarded_transition_applies_once() {
        let store = MemoryStore::new();
        OrderRepository::insert(&store, &order_with_intent("pi_1")).await.unwrap();

        let succeeded = OrderTransition::Succeeded {
            key: OrderKey::PaymentIntent("pi_1".to_string()),
            charge_id: Some("ch_1".to_string()),
        };
        assert!(store.apply_transition(&succeeded).await.unwrap().is_some());
        assert!(store.apply_transition(&succeeded).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refund_by_charge_id() {
        let store = MemoryStore::new();
        OrderRepository::insert(&store, &order_with_intent("pi_1")).await.unwrap();
        store
            .apply_transition(&OrderTransition::Succeeded {
                key: OrderKey::PaymentIntent("pi_1".to_string()),
                charge_id: Some("ch_1".to_string()),
            })
            .await
            .unwrap();

        let refunded = store
            .apply_transition(&OrderTransition::Refunded {
                key: OrderKey::Charge("ch_1".to_string()),
                amount_refunded: 1100,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refunded.status, OrderStatus::Refunded);
    }

    #[tokio::test]
    async fn test_duplicate_payment_intent_conflicts() {
        let store = MemoryStore::new();
        OrderRepository::insert(&store, &order_with_intent("pi_dup")).await.unwrap();
        let err = OrderRepository::insert(&store, &order_with_intent("pi_dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_snapshot_upsert_keeps_identity_and_derives_health() {
        let store = MemoryStore::new();
        let org = Uuid::new_v4();
        let mut snapshot = AccountSnapshot {
            processor_account_id: "acct_1".to_string(),
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: false,
            requirements: Requirements::default(),
            external_account: Some(crate::domain::ExternalAccount {
                id: "ba_1".to_string(),
                ..Default::default()
            }),
        };
        let first = store.upsert_snapshot(org, &snapshot, None).await.unwrap();

        store
            .upsert(&PayoutUpsert {
                processor_ref: "po_1".to_string(),
                kind: PayoutKind::Payout,
                organization_id: Some(org),
                processor_account_id: Some("acct_1".to_string()),
                amount: 500,
                currency: "usd".to_string(),
                status: PayoutStatus::Failed,
                destination: Some("ba_1".to_string()),
                failure_code: Some("account_closed".to_string()),
                failure_message: None,
                source_ref: None,
                processor_created_at: None,
            })
            .await
            .unwrap();

        snapshot.details_submitted = true;
        let second = store.upsert_snapshot(org, &snapshot, None).await.unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.payout_health.is_undeliverable());
        assert!(!second.pending_stale_sync);
    }

    #[tokio::test]
    async fn test_latest_payout_follows_processor_time_not_arrival() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let payout = |id: &str, status, created| PayoutUpsert {
            processor_ref: id.to_string(),
            kind: PayoutKind::Payout,
            organization_id: None,
            processor_account_id: Some("acct_1".to_string()),
            amount: 900,
            currency: "usd".to_string(),
            status,
            destination: Some("ba_1".to_string()),
            failure_code: None,
            failure_message: None,
            source_ref: None,
            processor_created_at: Some(created),
        };

        store
            .upsert(&payout("po_new", PayoutStatus::Paid, now))
            .await
            .unwrap();
        store
            .upsert(&payout(
                "po_old",
                PayoutStatus::Failed,
                now - chrono::Duration::hours(1),
            ))
            .await
            .unwrap();

        let latest = store.latest_for_account("acct_1").await.unwrap().unwrap();
        assert_eq!(latest.processor_ref.as_deref(), Some("po_new"));
    }

    #[tokio::test]
    async fn test_member_added_after_calculation_resets_pool() {
        let store = MemoryStore::new();
        let pool = TipPool::new(
            Uuid::new_v4(),
            "Week 1",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
            100,
        );
        store.insert_pool(&pool).await.unwrap();
        let member = TipPoolMember::new(pool.id, "user_1", None, BigDecimal::from(8_i64), 0);
        store.insert_member(&member).await.unwrap();
        store
            .save_calculation(
                pool.id,
                &[MemberShare {
                    member_id: member.id,
                    share: 100,
                }],
            )
            .await
            .unwrap();

        store
            .insert_member(&TipPoolMember::new(pool.id, "user_2", None, BigDecimal::from(4_i64), 0))
            .await
            .unwrap();
        let pool = store.get_pool(pool.id).await.unwrap().unwrap();
        assert_eq!(pool.status, TipPoolStatus::Draft);

        let stale = store
            .save_calculation(
                pool.id,
                &[MemberShare {
                    member_id: member.id,
                    share: 100,
                }],
            )
            .await;
        assert!(matches!(stale, Err(RepositoryError::Conflict(_))));
    }
}
