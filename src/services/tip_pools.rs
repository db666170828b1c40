use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::distribution::{allocate_tip_pool, DistributionError, Hours, MemberHours};
use crate::domain::{TipPool, TipPoolMember, TipPoolStatus};
use crate::jobs::{enqueue, EnqueueOptions, JobQueue, TransferJob};
use crate::ports::{OrderRepository, RepositoryError, TipPoolRepository};

#[derive(Debug, Error)]
pub enum TipPoolError {
    #[error("Tip pool {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for TipPoolError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Conflict(reason) => TipPoolError::Conflict(reason),
            other => TipPoolError::Repository(other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewTipPool {
    pub organization_id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Taken from completed orders' tips in the window when omitted.
    #[serde(default)]
    pub total_tips: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewTipPoolMember {
    pub user_ref: String,
    #[serde(default)]
    pub recipient_account_id: Option<String>,
    #[schema(value_type = String)]
    pub hours_worked: BigDecimal,
    #[serde(default)]
    pub tips_earned: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TipPoolDetails {
    #[serde(flatten)]
    pub pool: TipPool,
    pub members: Vec<TipPoolMember>,
}

/// Tip pool lifecycle: draft → calculated → finalized.
pub struct TipPoolService {
    pools: Arc<dyn TipPoolRepository>,
    orders: Arc<dyn OrderRepository>,
    jobs: Arc<dyn JobQueue>,
    currency: String,
    job_options: EnqueueOptions,
}

impl TipPoolService {
    pub fn new(
        pools: Arc<dyn TipPoolRepository>,
        orders: Arc<dyn OrderRepository>,
        jobs: Arc<dyn JobQueue>,
        currency: impl Into<String>,
        job_options: EnqueueOptions,
    ) -> Self {
        Self {
            pools,
            orders,
            jobs,
            currency: currency.into(),
            job_options,
        }
    }

    pub async fn create_pool(&self, request: NewTipPool) -> Result<TipPool, TipPoolError> {
        if request.name.trim().is_empty() {
            return Err(TipPoolError::Invalid("name must not be empty".to_string()));
        }
        if request.end_date < request.start_date {
            return Err(TipPoolError::Invalid(
                "end_date must not be before start_date".to_string(),
            ));
        }

        let total_tips = match request.total_tips {
            Some(total) if total < 0 => {
                return Err(DistributionError::Negative { field: "total_tips" }.into())
            }
            Some(total) => total,
            None => {
                self.orders
                    .completed_tip_total(request.organization_id, request.start_date, request.end_date)
                    .await?
            }
        };

        let pool = TipPool::new(
            request.organization_id,
            request.name.trim(),
            request.start_date,
            request.end_date,
            total_tips,
        );
        let pool = self.pools.insert_pool(&pool).await?;
        tracing::info!(
            tip_pool_id = %pool.id,
            organization_id = %pool.organization_id,
            total_tips = pool.total_tips,
            "Tip pool created"
        );
        Ok(pool)
    }

    pub async fn get_pool(&self, pool_id: Uuid) -> Result<TipPoolDetails, TipPoolError> {
        let pool = self.load(pool_id).await?;
        let members = self.pools.members(pool_id).await?;
        Ok(TipPoolDetails { pool, members })
    }

    pub async fn add_member(
        &self,
        pool_id: Uuid,
        request: NewTipPoolMember,
    ) -> Result<TipPoolMember, TipPoolError> {
        if request.user_ref.trim().is_empty() {
            return Err(TipPoolError::Invalid("user_ref must not be empty".to_string()));
        }
        Hours::from_decimal(&request.hours_worked)?;

        let pool = self.load(pool_id).await?;
        if pool.status == TipPoolStatus::Finalized {
            return Err(TipPoolError::Conflict(format!("tip pool {} is finalized", pool_id)));
        }

        let member = TipPoolMember::new(
            pool_id,
            request.user_ref.trim(),
            request.recipient_account_id,
            request.hours_worked,
            request.tips_earned,
        );
        Ok(self.pools.insert_member(&member).await?)
    }

    /// Recomputes every member's share. Repeatable until the pool is
    /// finalized; each run overwrites the previous one.
    pub async fn calculate(&self, pool_id: Uuid) -> Result<TipPoolDetails, TipPoolError> {
        let pool = self.load(pool_id).await?;
        if pool.status == TipPoolStatus::Finalized {
            return Err(TipPoolError::Conflict(format!("tip pool {} is finalized", pool_id)));
        }

        let members = self.pools.members(pool_id).await?;
        let hours = members
            .iter()
            .map(|m| {
                Ok(MemberHours {
                    member_id: m.id,
                    hours: Hours::from_decimal(&m.hours_worked)?,
                })
            })
            .collect::<Result<Vec<_>, DistributionError>>()?;
        let shares = allocate_tip_pool(pool.total_tips, &hours)?;

        let pool = self.pools.save_calculation(pool_id, &shares).await?;
        tracing::info!(
            tip_pool_id = %pool_id,
            members = shares.len(),
            total_tips = pool.total_tips,
            "Tip pool calculated"
        );
        self.get_pool(pool_id).await
    }

    /// Locks the pool and queues one transfer per member with a recipient
    /// account and a positive share.
    pub async fn finalize(&self, pool_id: Uuid) -> Result<TipPoolDetails, TipPoolError> {
        let Some(pool) = self.pools.finalize(pool_id).await? else {
            let pool = self.load(pool_id).await?;
            return Err(TipPoolError::Conflict(format!(
                "tip pool {} is {}, only a calculated pool can be finalized",
                pool_id, pool.status
            )));
        };

        let members = self.pools.members(pool_id).await?;
        let mut queued = 0;
        for member in &members {
            let (Some(recipient), Some(amount)) = (member.recipient_account_id.as_deref(), member.final_amount)
            else {
                continue;
            };
            if amount <= 0 {
                continue;
            }
            let job = TransferJob::tip_payout(
                pool.id,
                member.id,
                pool.organization_id,
                recipient,
                amount,
                &self.currency,
            );
            match enqueue(self.jobs.as_ref(), &job, self.job_options).await {
                Ok(_) => queued += 1,
                // The pool is already finalized; this payout must be issued by hand.
                Err(e) => tracing::error!(
                    tip_pool_id = %pool.id,
                    member_id = %member.id,
                    recipient = %recipient,
                    amount,
                    currency = %self.currency,
                    idempotency_key = %job.idempotency_key,
                    error = %e,
                    "Tip payout not queued after finalize"
                ),
            }
        }

        tracing::info!(tip_pool_id = %pool.id, transfers = queued, "Tip pool finalized");
        Ok(TipPoolDetails { pool, members })
    }

    /// Organization that owns the pool.
    pub async fn owner(&self, pool_id: Uuid) -> Result<Uuid, TipPoolError> {
        Ok(self.load(pool_id).await?.organization_id)
    }

    async fn load(&self, pool_id: Uuid) -> Result<TipPool, TipPoolError> {
        self.pools
            .get_pool(pool_id)
            .await?
            .ok_or(TipPoolError::NotFound(pool_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::{Order, OrderKey, OrderTransition};
    use crate::jobs::{Job, JobId, MemoryJobQueue, QueueError, TRANSFERS_QUEUE};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::fmt;
    use std::str::FromStr;
    use std::sync::Mutex;
    use tracing::field::Field;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn service(store: Arc<MemoryStore>, jobs: Arc<MemoryJobQueue>) -> TipPoolService {
        TipPoolService::new(store.clone(), store, jobs, "usd", EnqueueOptions::default())
    }

    fn new_pool(org: Uuid, total: Option<i64>) -> NewTipPool {
        NewTipPool {
            organization_id: org,
            name: "Friday".to_string(),
            start_date: date("2024-03-01"),
            end_date: date("2024-03-31"),
            total_tips: total,
        }
    }

    fn member(user: &str, account: Option<&str>, hours: &str) -> NewTipPoolMember {
        NewTipPoolMember {
            user_ref: user.to_string(),
            recipient_account_id: account.map(str::to_string),
            hours_worked: BigDecimal::from_str(hours).unwrap(),
            tips_earned: 0,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_distributes_every_cent() {
        let store = Arc::new(MemoryStore::new());
        let jobs = Arc::new(MemoryJobQueue::new());
        let service = service(store, jobs.clone());

        let pool = service.create_pool(new_pool(Uuid::new_v4(), Some(10_000))).await.unwrap();
        service.add_member(pool.id, member("a", Some("acct_a"), "3")).await.unwrap();
        service.add_member(pool.id, member("b", Some("acct_b"), "3")).await.unwrap();
        service.add_member(pool.id, member("c", None, "3")).await.unwrap();

        let calculated = service.calculate(pool.id).await.unwrap();
        assert_eq!(calculated.pool.status, TipPoolStatus::Calculated);
        let shares: Vec<i64> = calculated.members.iter().filter_map(|m| m.pool_share).collect();
        assert_eq!(shares, vec![3_333, 3_333, 3_334]);

        let finalized = service.finalize(pool.id).await.unwrap();
        assert_eq!(finalized.pool.status, TipPoolStatus::Finalized);
        assert_eq!(jobs.jobs_in(TRANSFERS_QUEUE).len(), 2);

        assert!(matches!(service.calculate(pool.id).await, Err(TipPoolError::Conflict(_))));
        assert!(matches!(
            service.add_member(pool.id, member("d", None, "1")).await,
            Err(TipPoolError::Conflict(_))
        ));
    }

    struct RefusingQueue;

    #[async_trait]
    impl JobQueue for RefusingQueue {
        async fn enqueue(
            &self,
            _queue: &str,
            _payload: serde_json::Value,
            _options: EnqueueOptions,
        ) -> Result<JobId, QueueError> {
            Err(QueueError::Corrupt("queue unavailable".to_string()))
        }

        async fn reserve(&self, _queues: &[String]) -> Result<Option<Job>, QueueError> {
            Ok(None)
        }

        async fn complete(&self, _id: JobId) -> Result<(), QueueError> {
            Ok(())
        }

        async fn retry(&self, _id: JobId, _run_at: DateTime<Utc>, _error: &str) -> Result<(), QueueError> {
            Ok(())
        }

        async fn dead_letter(&self, _id: JobId, _error: &str) -> Result<(), QueueError> {
            Ok(())
        }

        async fn list_dead(&self, _limit: i64) -> Result<Vec<Job>, QueueError> {
            Ok(Vec::new())
        }

        async fn requeue_dead(&self, _id: JobId) -> Result<bool, QueueError> {
            Ok(false)
        }

        async fn reclaim_stale(&self, _older_than: std::time::Duration) -> Result<u64, QueueError> {
            Ok(0)
        }
    }

    /// Collects the fields of every ERROR event.
    #[derive(Clone, Default)]
    struct ErrorEvents(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> Layer<S> for ErrorEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() != tracing::Level::ERROR {
                return;
            }
            let mut fields = String::new();
            event.record(&mut |field: &Field, value: &dyn fmt::Debug| {
                fields.push_str(&format!("{}={:?} ", field.name(), value));
            });
            self.0.lock().unwrap().push(fields);
        }
    }

    #[tokio::test]
    async fn test_unqueued_tip_payout_is_logged_as_error() {
        let errors = ErrorEvents::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(errors.clone()));

        let store = Arc::new(MemoryStore::new());
        let service = TipPoolService::new(
            store.clone(),
            store,
            Arc::new(RefusingQueue),
            "usd",
            EnqueueOptions::default(),
        );
        let pool = service.create_pool(new_pool(Uuid::new_v4(), Some(5_000))).await.unwrap();
        let ana = service
            .add_member(pool.id, member("ana", Some("acct_ana"), "4"))
            .await
            .unwrap();
        service.calculate(pool.id).await.unwrap();

        let finalized = service.finalize(pool.id).await.unwrap();
        assert_eq!(finalized.pool.status, TipPoolStatus::Finalized);

        let logged = errors.0.lock().unwrap().clone();
        let entry = logged
            .iter()
            .find(|fields| fields.contains(&format!("member_id={}", ana.id)))
            .expect("lost payout is logged at error");
        assert!(entry.contains("amount=5000"));
        assert!(entry.contains("recipient=acct_ana"));
    }

    #[tokio::test]
    async fn test_finalize_requires_calculation() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store, Arc::new(MemoryJobQueue::new()));
        let pool = service.create_pool(new_pool(Uuid::new_v4(), Some(100))).await.unwrap();

        assert!(matches!(service.finalize(pool.id).await, Err(TipPoolError::Conflict(_))));
        assert!(matches!(
            service.finalize(Uuid::new_v4()).await,
            Err(TipPoolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_hours_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store, Arc::new(MemoryJobQueue::new()));
        let pool = service.create_pool(new_pool(Uuid::new_v4(), Some(100))).await.unwrap();
        service.add_member(pool.id, member("a", None, "0")).await.unwrap();

        assert!(matches!(
            service.calculate(pool.id).await,
            Err(TipPoolError::Distribution(DistributionError::ZeroTotalHours))
        ));
    }

    #[tokio::test]
    async fn test_total_defaults_to_completed_order_tips() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        for (pi, tip) in [("pi_1", 300), ("pi_2", 200)] {
            let order = Order::new(org, None, 1_000, 0, tip, "usd", Some(pi.to_string()));
            OrderRepository::insert(store.as_ref(), &order).await.unwrap();
            store
                .apply_transition(&OrderTransition::Succeeded {
                    key: OrderKey::PaymentIntent(pi.to_string()),
                    charge_id: None,
                })
                .await
                .unwrap();
        }
        let pending = Order::new(org, None, 1_000, 0, 999, "usd", Some("pi_3".to_string()));
        OrderRepository::insert(store.as_ref(), &pending).await.unwrap();

        let service = service(store, Arc::new(MemoryJobQueue::new()));
        let today = chrono::Utc::now().date_naive();
        let pool = service
            .create_pool(NewTipPool {
                organization_id: org,
                name: "Today".to_string(),
                start_date: today,
                end_date: today,
                total_tips: None,
            })
            .await
            .unwrap();
        assert_eq!(pool.total_tips, 500);
    }

    #[tokio::test]
    async fn test_inverted_window_is_invalid() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store, Arc::new(MemoryJobQueue::new()));
        let mut request = new_pool(Uuid::new_v4(), Some(1));
        request.end_date = date("2024-02-01");
        assert!(matches!(service.create_pool(request).await, Err(TipPoolError::Invalid(_))));
    }
}
