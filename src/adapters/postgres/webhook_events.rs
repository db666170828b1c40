use async_trait::async_trait;
use sqlx::PgPool;

use crate::ports::{RepositoryResult, WebhookEventRepository};

#[derive(Clone)]
pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn is_processed(&self, event_id: &str) -> RepositoryResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM webhook_events WHERE event_id = $1)")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn record_processed(
        &self,
        event_id: &str,
        event_type: &str,
        processor_account_id: Option<&str>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, processor_account_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(processor_account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
