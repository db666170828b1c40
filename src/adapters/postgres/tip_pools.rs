use std::collections::HashSet;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::distribution::MemberShare;
use crate::domain::{TipPool, TipPoolMember, TipPoolStatus};
use crate::ports::{RepositoryError, RepositoryResult, TipPoolRepository};

const POOL_COLUMNS: &str = "id, organization_id, name, start_date, end_date, status, total_tips, \
                            calculated_at, finalized_at, created_at, updated_at";

const MEMBER_COLUMNS: &str = "id, tip_pool_id, user_ref, recipient_account_id, hours_worked, \
                              tips_earned, pool_share, final_amount, created_at";

#[derive(Clone)]
pub struct PostgresTipPoolRepository {
    pool: PgPool,
}

impl PostgresTipPoolRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Locks the pool row for the rest of the transaction.
async fn lock_pool_status(
    tx: &mut Transaction<'_, Postgres>,
    pool_id: Uuid,
) -> RepositoryResult<TipPoolStatus> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM tip_pools WHERE id = $1 FOR UPDATE")
            .bind(pool_id)
            .fetch_optional(&mut **tx)
            .await?;

    match status {
        Some(status) => Ok(status.parse()?),
        None => Err(RepositoryError::NotFound(format!("tip pool {}", pool_id))),
    }
}

#[async_trait]
impl TipPoolRepository for PostgresTipPoolRepository {
    async fn insert_pool(&self, pool: &TipPool) -> RepositoryResult<TipPool> {
        let sql = format!(
            r#"
            INSERT INTO tip_pools (
                id, organization_id, name, start_date, end_date, status, total_tips,
                calculated_at, finalized_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            POOL_COLUMNS
        );
        let row = sqlx::query_as::<_, TipPoolRow>(&sql)
            .bind(pool.id)
            .bind(pool.organization_id)
            .bind(&pool.name)
            .bind(pool.start_date)
            .bind(pool.end_date)
            .bind(pool.status.as_str())
            .bind(pool.total_tips)
            .bind(pool.calculated_at)
            .bind(pool.finalized_at)
            .bind(pool.created_at)
            .bind(pool.updated_at)
            .fetch_one(&self.pool)
            .await?;

        row.into_domain()
    }

    async fn get_pool(&self, pool_id: Uuid) -> RepositoryResult<Option<TipPool>> {
        let sql = format!("SELECT {} FROM tip_pools WHERE id = $1", POOL_COLUMNS);
        let row = sqlx::query_as::<_, TipPoolRow>(&sql)
            .bind(pool_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TipPoolRow::into_domain).transpose()
    }

    async fn insert_member(&self, member: &TipPoolMember) -> RepositoryResult<TipPoolMember> {
        let mut tx = self.pool.begin().await?;

        match lock_pool_status(&mut tx, member.tip_pool_id).await? {
            TipPoolStatus::Finalized => {
                return Err(RepositoryError::Conflict(format!(
                    "tip pool {} is finalized",
                    member.tip_pool_id
                )))
            }
            TipPoolStatus::Calculated => {
                sqlx::query(
                    "UPDATE tip_pools SET status = 'draft', updated_at = NOW() WHERE id = $1",
                )
                .bind(member.tip_pool_id)
                .execute(&mut *tx)
                .await?;
            }
            TipPoolStatus::Draft => {}
        }

        let sql = format!(
            r#"
            INSERT INTO tip_pool_members (
                id, tip_pool_id, user_ref, recipient_account_id, hours_worked, tips_earned,
                pool_share, final_amount, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        );
        let row = sqlx::query_as::<_, TipPoolMemberRow>(&sql)
            .bind(member.id)
            .bind(member.tip_pool_id)
            .bind(&member.user_ref)
            .bind(&member.recipient_account_id)
            .bind(&member.hours_worked)
            .bind(member.tips_earned)
            .bind(member.pool_share)
            .bind(member.final_amount)
            .bind(member.created_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into_domain())
    }

    async fn members(&self, pool_id: Uuid) -> RepositoryResult<Vec<TipPoolMember>> {
        let sql = format!(
            "SELECT {} FROM tip_pool_members WHERE tip_pool_id = $1 ORDER BY created_at ASC, id ASC",
            MEMBER_COLUMNS
        );
        let rows = sqlx::query_as::<_, TipPoolMemberRow>(&sql)
            .bind(pool_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(TipPoolMemberRow::into_domain).collect())
    }

    async fn save_calculation(&self, pool_id: Uuid, shares: &[MemberShare]) -> RepositoryResult<TipPool> {
        let mut tx = self.pool.begin().await?;

        if lock_pool_status(&mut tx, pool_id).await? == TipPoolStatus::Finalized {
            return Err(RepositoryError::Conflict(format!("tip pool {} is finalized", pool_id)));
        }

        let stored: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM tip_pool_members WHERE tip_pool_id = $1")
            .bind(pool_id)
            .fetch_all(&mut *tx)
            .await?;
        let stored: HashSet<Uuid> = stored.into_iter().collect();
        let computed: HashSet<Uuid> = shares.iter().map(|s| s.member_id).collect();
        if stored != computed {
            return Err(RepositoryError::Conflict(format!(
                "tip pool {} members changed during calculation",
                pool_id
            )));
        }

        let ids: Vec<Uuid> = shares.iter().map(|s| s.member_id).collect();
        let amounts: Vec<i64> = shares.iter().map(|s| s.share).collect();
        sqlx::query(
            r#"
            UPDATE tip_pool_members AS m
            SET pool_share = s.share, final_amount = s.share
            FROM UNNEST($1::uuid[], $2::bigint[]) AS s(member_id, share)
            WHERE m.id = s.member_id AND m.tip_pool_id = $3
            "#,
        )
        .bind(ids)
        .bind(amounts)
        .bind(pool_id)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r#"
            UPDATE tip_pools
            SET status = 'calculated', calculated_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            POOL_COLUMNS
        );
        let row = sqlx::query_as::<_, TipPoolRow>(&sql)
            .bind(pool_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        row.into_domain()
    }

    async fn finalize(&self, pool_id: Uuid) -> RepositoryResult<Option<TipPool>> {
        let sql = format!(
            r#"
            UPDATE tip_pools
            SET status = 'finalized', finalized_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'calculated'
            RETURNING {}
            "#,
            POOL_COLUMNS
        );
        let row = sqlx::query_as::<_, TipPoolRow>(&sql)
            .bind(pool_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TipPoolRow::into_domain).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TipPoolRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: String,
    total_tips: i64,
    calculated_at: Option<DateTime<Utc>>,
    finalized_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TipPoolRow {
    fn into_domain(self) -> RepositoryResult<TipPool> {
        Ok(TipPool {
            id: self.id,
            organization_id: self.organization_id,
            name: self.name,
            start_date: self.start_date,
            end_date: self.end_date,
            status: self.status.parse()?,
            total_tips: self.total_tips,
            calculated_at: self.calculated_at,
            finalized_at: self.finalized_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TipPoolMemberRow {
    id: Uuid,
    tip_pool_id: Uuid,
    user_ref: String,
    recipient_account_id: Option<String>,
    hours_worked: BigDecimal,
    tips_earned: i64,
    pool_share: Option<i64>,
    final_amount: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TipPoolMemberRow {
    fn into_domain(self) -> TipPoolMember {
        TipPoolMember {
            id: self.id,
            tip_pool_id: self.tip_pool_id,
            user_ref: self.user_ref,
            recipient_account_id: self.recipient_account_id,
            hours_worked: self.hours_worked,
            tips_earned: self.tips_earned,
            pool_share: self.pool_share,
            final_amount: self.final_amount,
            created_at: self.created_at,
        }
    }
}
