use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{map_unique, status_strings};
use crate::domain::{Order, OrderKey, OrderStatus, OrderTransition, RevenueSplit};
use crate::ports::{OrderRepository, RepositoryResult, RevenueSplitRepository};

const ORDER_COLUMNS: &str = "id, organization_id, catalog_id, status, subtotal, tax, tip, total, \
                             amount_refunded, currency, customer_email, payment_intent_id, charge_id, \
                             failure_message, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn key_column(key: &OrderKey) -> &'static str {
    match key {
        OrderKey::PaymentIntent(_) => "payment_intent_id",
        OrderKey::Charge(_) => "charge_id",
    }
}

/// The `SET` clause for a transition. `$3` is the transition's value, if any.
fn set_clause(transition: &OrderTransition) -> &'static str {
    match transition {
        OrderTransition::Processing { .. } => "status = 'processing'",
        OrderTransition::Succeeded { .. } => {
            "status = 'completed', charge_id = COALESCE(charge_id, $3), failure_message = NULL"
        }
        OrderTransition::Failed { .. } => "status = 'failed', failure_message = $3",
        OrderTransition::Refunded { .. } => {
            "status = CASE WHEN $3 >= total THEN 'refunded' ELSE 'partially_refunded' END, \
             amount_refunded = $3"
        }
    }
}

/// Extra `WHERE` predicate on top of the shared status guard. A refund only
/// applies when its cumulative amount exceeds the stored one.
fn extra_guard(transition: &OrderTransition) -> &'static str {
    match transition {
        OrderTransition::Refunded { .. } => " AND amount_refunded < $3",
        _ => "",
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert(&self, order: &Order) -> RepositoryResult<Order> {
        let sql = format!(
            r#"
            INSERT INTO orders (
                id, organization_id, catalog_id, status, subtotal, tax, tip, total,
                amount_refunded, currency, customer_email, payment_intent_id, charge_id,
                failure_message, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order.id)
            .bind(order.organization_id)
            .bind(order.catalog_id)
            .bind(order.status.as_str())
            .bind(order.subtotal)
            .bind(order.tax)
            .bind(order.tip)
            .bind(order.total)
            .bind(order.amount_refunded)
            .bind(&order.currency)
            .bind(&order.customer_email)
            .bind(&order.payment_intent_id)
            .bind(&order.charge_id)
            .bind(&order.failure_message)
            .bind(order.created_at)
            .bind(order.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique(e, "order processor id already in use"))?;

        row.into_domain()
    }

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> RepositoryResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE payment_intent_id = $1", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(payment_intent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(OrderRow::into_domain).transpose()
    }

    async fn apply_transition(&self, transition: &OrderTransition) -> RepositoryResult<Option<Order>> {
        let key = transition.key();
        let sql = format!(
            r#"
            UPDATE orders
            SET {}, updated_at = NOW()
            WHERE {} = $1 AND status = ANY($2){}
            RETURNING {}
            "#,
            set_clause(transition),
            key_column(key),
            extra_guard(transition),
            ORDER_COLUMNS
        );
        let allowed = status_strings(transition.allowed_from(), OrderStatus::as_str);

        let query = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(key.as_str())
            .bind(allowed);
        let query = match transition {
            OrderTransition::Processing { .. } => query,
            OrderTransition::Succeeded { charge_id, .. } => query.bind(charge_id.clone()),
            OrderTransition::Failed {
                failure_message, ..
            } => query.bind(failure_message.clone()),
            OrderTransition::Refunded {
                amount_refunded, ..
            } => query.bind(*amount_refunded),
        };

        let row = query.fetch_optional(&self.pool).await?;
        row.map(OrderRow::into_domain).transpose()
    }

    async fn completed_tip_total(
        &self,
        organization_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(tip), 0)::BIGINT
            FROM orders
            WHERE organization_id = $1
              AND status = 'completed'
              AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3
            "#,
        )
        .bind(organization_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn completed_gross_for_catalog(
        &self,
        organization_id: Uuid,
        catalog_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<i64> {
        let gross: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(subtotal), 0)::BIGINT
            FROM orders
            WHERE organization_id = $1
              AND catalog_id = $2
              AND status = 'completed'
              AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $3 AND $4
            "#,
        )
        .bind(organization_id)
        .bind(catalog_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(gross)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    organization_id: Uuid,
    catalog_id: Option<Uuid>,
    status: String,
    subtotal: i64,
    tax: i64,
    tip: i64,
    total: i64,
    amount_refunded: i64,
    currency: String,
    customer_email: Option<String>,
    payment_intent_id: Option<String>,
    charge_id: Option<String>,
    failure_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self) -> RepositoryResult<Order> {
        Ok(Order {
            id: self.id,
            organization_id: self.organization_id,
            catalog_id: self.catalog_id,
            status: self.status.parse()?,
            subtotal: self.subtotal,
            tax: self.tax,
            tip: self.tip,
            total: self.total,
            amount_refunded: self.amount_refunded,
            currency: self.currency,
            customer_email: self.customer_email,
            payment_intent_id: self.payment_intent_id,
            charge_id: self.charge_id,
            failure_message: self.failure_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PostgresRevenueSplitRepository {
    pool: PgPool,
}

impl PostgresRevenueSplitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevenueSplitRepository for PostgresRevenueSplitRepository {
    async fn insert(&self, split: &RevenueSplit) -> RepositoryResult<RevenueSplit> {
        let row = sqlx::query_as::<_, RevenueSplitRow>(
            r#"
            INSERT INTO revenue_splits (
                id, catalog_id, recipient_name, recipient_account_id, percentage, is_active, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, catalog_id, recipient_name, recipient_account_id, percentage, is_active, created_at
            "#,
        )
        .bind(split.id)
        .bind(split.catalog_id)
        .bind(&split.recipient_name)
        .bind(&split.recipient_account_id)
        .bind(&split.percentage)
        .bind(split.is_active)
        .bind(split.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_domain())
    }

    async fn active_for_catalog(&self, catalog_id: Uuid) -> RepositoryResult<Vec<RevenueSplit>> {
        let rows = sqlx::query_as::<_, RevenueSplitRow>(
            r#"
            SELECT id, catalog_id, recipient_name, recipient_account_id, percentage, is_active, created_at
            FROM revenue_splits
            WHERE catalog_id = $1 AND is_active
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(catalog_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RevenueSplitRow::into_domain).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RevenueSplitRow {
    id: Uuid,
    catalog_id: Uuid,
    recipient_name: String,
    recipient_account_id: Option<String>,
    percentage: BigDecimal,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl RevenueSplitRow {
    fn into_domain(self) -> RevenueSplit {
        RevenueSplit {
            id: self.id,
            catalog_id: self.catalog_id,
            recipient_name: self.recipient_name,
            recipient_account_id: self.recipient_account_id,
            percentage: self.percentage,
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_write_resolves_outcome_in_sql() {
        let clause = set_clause(&OrderTransition::Refunded {
            key: OrderKey::Charge("ch_1".to_string()),
            amount_refunded: 10,
        });
        assert!(clause.contains("CASE WHEN $3 >= total"));
    }

    #[test]
    fn test_refund_write_only_moves_amount_forward() {
        let refund = OrderTransition::Refunded {
            key: OrderKey::Charge("ch_1".to_string()),
            amount_refunded: 300,
        };
        assert_eq!(extra_guard(&refund), " AND amount_refunded < $3");
        assert_eq!(
            extra_guard(&OrderTransition::Processing {
                key: OrderKey::PaymentIntent("pi".into()),
            }),
            ""
        );
    }

    #[test]
    fn test_key_column_follows_order_key() {
        assert_eq!(key_column(&OrderKey::PaymentIntent("pi".into())), "payment_intent_id");
        assert_eq!(key_column(&OrderKey::Charge("ch".into())), "charge_id");
    }

    #[test]
    fn test_success_sets_charge_id_once() {
        let clause = set_clause(&OrderTransition::Succeeded {
            key: OrderKey::PaymentIntent("pi".into()),
            charge_id: None,
        });
        assert!(clause.contains("COALESCE(charge_id, $3)"));
    }
}
