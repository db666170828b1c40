//! Postgres-backed job queue. Workers claim rows with
//! `FOR UPDATE SKIP LOCKED`, so any number of them can poll concurrently
//! without blocking on each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::queue::{chrono_delay, EnqueueOptions, Job, JobId, JobQueue, QueueError};

const JOB_COLUMNS: &str = "id, queue, payload, status, attempts, max_attempts, backoff_base_ms, \
                           backoff_max_ms, run_at, last_error, created_at, updated_at";

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let (backoff_base_ms, backoff_max_ms) = options.policy.backoff.as_millis_pair();
        let run_at = Utc::now() + chrono_delay(options.delay);

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (id, queue, payload, status, attempts, max_attempts,
                              backoff_base_ms, backoff_max_ms, run_at)
            VALUES ($1, $2, $3, 'queued', 0, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(queue)
        .bind(&payload)
        .bind(options.policy.max_attempts as i32)
        .bind(backoff_base_ms)
        .bind(backoff_max_ms)
        .bind(run_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(job_id = %id, queue = %queue, "Job enqueued");
        Ok(id)
    }

    async fn reserve(&self, queues: &[String]) -> Result<Option<Job>, QueueError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'running', attempts = attempts + 1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued'
                  AND run_at <= NOW()
                  AND (cardinality($1::text[]) = 0 OR queue = ANY($1))
                ORDER BY run_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(queues)
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRow::into_domain).transpose()
    }

    async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        sqlx::query("UPDATE jobs SET status = 'completed', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn retry(&self, id: JobId, run_at: DateTime<Utc>, error: &str) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', run_at = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letter(&self, id: JobId, error: &str) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE jobs SET status = 'dead', last_error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dead(&self, limit: i64) -> Result<Vec<Job>, QueueError> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = 'dead' ORDER BY updated_at DESC, id LIMIT $1",
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(JobRow::into_domain).collect()
    }

    async fn requeue_dead(&self, id: JobId) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', attempts = 0, run_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'dead'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', run_at = NOW(), updated_at = NOW()
            WHERE status = 'running'
              AND updated_at < NOW() - ($1::bigint * INTERVAL '1 millisecond')
            "#,
        )
        .bind(older_than.as_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    queue: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    backoff_base_ms: i64,
    backoff_max_ms: i64,
    run_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_domain(self) -> Result<Job, QueueError> {
        Ok(Job {
            id: self.id,
            queue: self.queue,
            payload: self.payload,
            status: self.status.parse()?,
            attempts: self.attempts.max(0) as u32,
            max_attempts: self.max_attempts.max(1) as u32,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
            run_at: self.run_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
