use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{map_unique, status_strings};
use crate::domain::{
    payout_health, AccountSnapshot, ExternalAccount, MerchantAccount, Payout, PayoutHealth,
    PayoutStatus, PayoutUpsert, Requirements,
};
use crate::ports::{MerchantAccountRepository, PayoutRepository, RepositoryResult};

const PAYOUT_COLUMNS: &str = "id, organization_id, processor_account_id, processor_ref, kind, amount, \
                              currency, status, destination, failure_code, failure_message, source_ref, \
                              processor_created_at, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, organization_id, processor_account_id, charges_enabled, payouts_enabled, \
                               details_submitted, currently_due, eventually_due, past_due, disabled_reason, \
                               onboarding_state, external_account_id, external_account_last4, \
                               external_account_type, external_account_status, payout_status, \
                               payout_failure_code, payout_failure_message, pending_stale_sync, \
                               last_synced_at, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresPayoutRepository {
    pool: PgPool,
}

impl PostgresPayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn latest_payout(
    tx: &mut Transaction<'_, Postgres>,
    processor_account_id: &str,
) -> RepositoryResult<Option<Payout>> {
    let sql = format!(
        r#"
        SELECT {} FROM payouts
        WHERE processor_account_id = $1 AND kind = 'payout'
        ORDER BY COALESCE(processor_created_at, created_at) DESC, created_at DESC, id DESC
        LIMIT 1
        "#,
        PAYOUT_COLUMNS
    );
    let row = sqlx::query_as::<_, PayoutRow>(&sql)
        .bind(processor_account_id)
        .fetch_optional(&mut **tx)
        .await?;

    row.map(PayoutRow::into_domain).transpose()
}

#[async_trait]
impl PayoutRepository for PostgresPayoutRepository {
    async fn upsert(&self, upsert: &PayoutUpsert) -> RepositoryResult<Option<Payout>> {
        let sql = format!(
            r#"
            INSERT INTO payouts (
                id, organization_id, processor_account_id, processor_ref, kind, amount, currency,
                status, destination, failure_code, failure_message, source_ref, processor_created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $14)
            ON CONFLICT (processor_ref) DO UPDATE SET
                status = EXCLUDED.status,
                amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                destination = COALESCE(EXCLUDED.destination, payouts.destination),
                failure_code = EXCLUDED.failure_code,
                failure_message = EXCLUDED.failure_message,
                organization_id = COALESCE(payouts.organization_id, EXCLUDED.organization_id),
                processor_account_id = COALESCE(payouts.processor_account_id, EXCLUDED.processor_account_id),
                source_ref = COALESCE(payouts.source_ref, EXCLUDED.source_ref),
                processor_created_at = COALESCE(EXCLUDED.processor_created_at, payouts.processor_created_at),
                updated_at = NOW()
            WHERE payouts.status = ANY($13)
            RETURNING {}
            "#,
            PAYOUT_COLUMNS
        );
        let allowed = status_strings(upsert.status.allowed_predecessors(), PayoutStatus::as_str);

        let row = sqlx::query_as::<_, PayoutRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(upsert.organization_id)
            .bind(&upsert.processor_account_id)
            .bind(&upsert.processor_ref)
            .bind(upsert.kind.as_str())
            .bind(upsert.amount)
            .bind(&upsert.currency)
            .bind(upsert.status.as_str())
            .bind(&upsert.destination)
            .bind(&upsert.failure_code)
            .bind(&upsert.failure_message)
            .bind(&upsert.source_ref)
            .bind(allowed)
            .bind(upsert.processor_created_at)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PayoutRow::into_domain).transpose()
    }

    async fn latest_for_account(&self, processor_account_id: &str) -> RepositoryResult<Option<Payout>> {
        let mut tx = self.pool.begin().await?;
        let latest = latest_payout(&mut tx, processor_account_id).await?;
        tx.commit().await?;
        Ok(latest)
    }
}

#[derive(Clone)]
pub struct PostgresMerchantAccountRepository {
    pool: PgPool,
}

impl PostgresMerchantAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by(&self, column: &str, value: String) -> RepositoryResult<Option<MerchantAccount>> {
        let sql = format!(
            "SELECT {} FROM merchant_accounts WHERE {} = $1",
            ACCOUNT_COLUMNS, column
        );
        let row = sqlx::query_as::<_, MerchantAccountRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(MerchantAccountRow::into_domain).transpose()
    }
}

#[async_trait]
impl MerchantAccountRepository for PostgresMerchantAccountRepository {
    async fn find_by_organization(&self, organization_id: Uuid) -> RepositoryResult<Option<MerchantAccount>> {
        let sql = format!(
            "SELECT {} FROM merchant_accounts WHERE organization_id = $1",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<_, MerchantAccountRow>(&sql)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(MerchantAccountRow::into_domain).transpose()
    }

    async fn find_by_processor_account(
        &self,
        processor_account_id: &str,
    ) -> RepositoryResult<Option<MerchantAccount>> {
        self.find_by("processor_account_id", processor_account_id.to_string())
            .await
    }

    async fn upsert_snapshot(
        &self,
        organization_id: Uuid,
        snapshot: &AccountSnapshot,
        read_at: Option<DateTime<Utc>>,
    ) -> RepositoryResult<MerchantAccount> {
        let mut tx = self.pool.begin().await?;

        let external = snapshot.external_account.clone().unwrap_or_default();
        let external_id = snapshot.external_account.as_ref().map(|e| e.id.clone());
        let latest = latest_payout(&mut tx, &snapshot.processor_account_id).await?;
        let health = payout_health(latest.as_ref(), external_id.as_deref());
        let onboarding_state = snapshot.onboarding_state();

        let sql = format!(
            r#"
            INSERT INTO merchant_accounts (
                id, organization_id, processor_account_id, charges_enabled, payouts_enabled,
                details_submitted, currently_due, eventually_due, past_due, disabled_reason,
                onboarding_state, external_account_id, external_account_last4,
                external_account_type, external_account_status, payout_status,
                payout_failure_code, payout_failure_message, pending_stale_sync, last_synced_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, FALSE, NOW())
            ON CONFLICT (processor_account_id) DO UPDATE SET
                charges_enabled = EXCLUDED.charges_enabled,
                payouts_enabled = EXCLUDED.payouts_enabled,
                details_submitted = EXCLUDED.details_submitted,
                currently_due = EXCLUDED.currently_due,
                eventually_due = EXCLUDED.eventually_due,
                past_due = EXCLUDED.past_due,
                disabled_reason = EXCLUDED.disabled_reason,
                onboarding_state = EXCLUDED.onboarding_state,
                external_account_id = EXCLUDED.external_account_id,
                external_account_last4 = EXCLUDED.external_account_last4,
                external_account_type = EXCLUDED.external_account_type,
                external_account_status = EXCLUDED.external_account_status,
                payout_status = EXCLUDED.payout_status,
                payout_failure_code = EXCLUDED.payout_failure_code,
                payout_failure_message = EXCLUDED.payout_failure_message,
                pending_stale_sync = CASE
                    WHEN $19::TIMESTAMPTZ IS NULL OR merchant_accounts.updated_at <= $19 THEN FALSE
                    ELSE merchant_accounts.pending_stale_sync
                END,
                last_synced_at = NOW(),
                updated_at = NOW()
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );

        let row = sqlx::query_as::<_, MerchantAccountRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(organization_id)
            .bind(&snapshot.processor_account_id)
            .bind(snapshot.charges_enabled)
            .bind(snapshot.payouts_enabled)
            .bind(snapshot.details_submitted)
            .bind(&snapshot.requirements.currently_due)
            .bind(&snapshot.requirements.eventually_due)
            .bind(&snapshot.requirements.past_due)
            .bind(&snapshot.requirements.disabled_reason)
            .bind(onboarding_state.as_str())
            .bind(external_id)
            .bind(external.last4)
            .bind(external.account_type)
            .bind(external.status)
            .bind(health.status)
            .bind(health.failure_code)
            .bind(health.failure_message)
            .bind(read_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_unique(e, "organization already has a merchant account"))?;

        tx.commit().await?;
        row.into_domain()
    }

    async fn refresh_payout_health(
        &self,
        processor_account_id: &str,
    ) -> RepositoryResult<Option<MerchantAccount>> {
        let mut tx = self.pool.begin().await?;

        let external_id: Option<Option<String>> = sqlx::query_scalar(
            "SELECT external_account_id FROM merchant_accounts WHERE processor_account_id = $1 FOR UPDATE",
        )
        .bind(processor_account_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(external_id) = external_id else {
            tx.commit().await?;
            return Ok(None);
        };

        let latest = latest_payout(&mut tx, processor_account_id).await?;
        let health = payout_health(latest.as_ref(), external_id.as_deref());

        let sql = format!(
            r#"
            UPDATE merchant_accounts
            SET payout_status = $2, payout_failure_code = $3, payout_failure_message = $4,
                updated_at = NOW()
            WHERE processor_account_id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<_, MerchantAccountRow>(&sql)
            .bind(processor_account_id)
            .bind(health.status)
            .bind(health.failure_code)
            .bind(health.failure_message)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        row.into_domain().map(Some)
    }

    async fn mark_pending_sync(&self, processor_account_id: &str) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE merchant_accounts
            SET pending_stale_sync = TRUE, updated_at = NOW()
            WHERE processor_account_id = $1
            "#,
        )
        .bind(processor_account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PayoutRow {
    id: Uuid,
    organization_id: Option<Uuid>,
    processor_account_id: Option<String>,
    processor_ref: Option<String>,
    kind: String,
    amount: i64,
    currency: String,
    status: String,
    destination: Option<String>,
    failure_code: Option<String>,
    failure_message: Option<String>,
    source_ref: Option<String>,
    processor_created_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PayoutRow {
    fn into_domain(self) -> RepositoryResult<Payout> {
        Ok(Payout {
            id: self.id,
            organization_id: self.organization_id,
            processor_account_id: self.processor_account_id,
            processor_ref: self.processor_ref,
            kind: self.kind.parse()?,
            amount: self.amount,
            currency: self.currency,
            status: self.status.parse()?,
            destination: self.destination,
            failure_code: self.failure_code,
            failure_message: self.failure_message,
            source_ref: self.source_ref,
            processor_created_at: self.processor_created_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MerchantAccountRow {
    id: Uuid,
    organization_id: Uuid,
    processor_account_id: String,
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
    currently_due: Vec<String>,
    eventually_due: Vec<String>,
    past_due: Vec<String>,
    disabled_reason: Option<String>,
    onboarding_state: String,
    external_account_id: Option<String>,
    external_account_last4: Option<String>,
    external_account_type: Option<String>,
    external_account_status: Option<String>,
    payout_status: Option<String>,
    payout_failure_code: Option<String>,
    payout_failure_message: Option<String>,
    pending_stale_sync: bool,
    last_synced_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MerchantAccountRow {
    fn into_domain(self) -> RepositoryResult<MerchantAccount> {
        let external_account = self.external_account_id.map(|id| ExternalAccount {
            id,
            last4: self.external_account_last4,
            account_type: self.external_account_type,
            status: self.external_account_status,
        });

        Ok(MerchantAccount {
            id: self.id,
            organization_id: self.organization_id,
            processor_account_id: self.processor_account_id,
            charges_enabled: self.charges_enabled,
            payouts_enabled: self.payouts_enabled,
            details_submitted: self.details_submitted,
            requirements: Requirements {
                currently_due: self.currently_due,
                eventually_due: self.eventually_due,
                past_due: self.past_due,
                disabled_reason: self.disabled_reason,
            },
            onboarding_state: self.onboarding_state.parse()?,
            external_account,
            payout_health: PayoutHealth {
                status: self.payout_status,
                failure_code: self.payout_failure_code,
                failure_message: self.payout_failure_message,
            },
            pending_stale_sync: self.pending_stale_sync,
            last_synced_at: self.last_synced_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
