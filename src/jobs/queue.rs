use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::policy::{Backoff, RetryPolicy};
use crate::domain::UnknownStatus;

pub type JobId = Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Corrupt job row: {0}")]
    Corrupt(String),
}

impl From<UnknownStatus> for QueueError {
    fn from(e: UnknownStatus) -> Self {
        QueueError::Corrupt(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "dead" => Ok(JobStatus::Dead),
            other => Err(UnknownStatus::new("job", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Attempts started so far, including the current one while running.
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: i64,
    pub backoff_max_ms: i64,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// The retry policy the job was enqueued with.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Backoff::from_millis_pair(self.backoff_base_ms, self.backoff_max_ms),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnqueueOptions {
    pub policy: RetryPolicy,
    pub delay: Duration,
}

impl EnqueueOptions {
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            policy,
            delay: Duration::ZERO,
        }
    }
}

pub(crate) fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)))
}

/// Durable named-queue storage with at-least-once delivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError>;

    /// Claims the next due job, marking it running and counting the attempt.
    /// An empty `queues` slice means any queue.
    async fn reserve(&self, queues: &[String]) -> Result<Option<Job>, QueueError>;

    async fn complete(&self, id: JobId) -> Result<(), QueueError>;

    async fn retry(&self, id: JobId, run_at: DateTime<Utc>, error: &str) -> Result<(), QueueError>;

    async fn dead_letter(&self, id: JobId, error: &str) -> Result<(), QueueError>;

    /// Most recently failed first.
    async fn list_dead(&self, limit: i64) -> Result<Vec<Job>, QueueError>;

    /// Puts a dead job back with a fresh attempt budget. `false` if no dead
    /// job has that id.
    async fn requeue_dead(&self, id: JobId) -> Result<bool, QueueError>;

    /// Returns jobs stuck in `running` longer than `older_than` to the queue.
    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64, QueueError>;
}

/// In-process queue. Same semantics as the Postgres queue, without
/// durability across restarts.
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_jobs<T>(&self, f: impl FnOnce(&mut HashMap<JobId, Job>) -> T) -> T {
        let mut guard = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Snapshot of every job in a queue, oldest first.
    pub fn jobs_in(&self, queue: &str) -> Vec<Job> {
        self.with_jobs(|jobs| {
            let mut found: Vec<Job> = jobs.values().filter(|j| j.queue == queue).cloned().collect();
            found.sort_by_key(|j| (j.created_at, j.id));
            found
        })
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.with_jobs(|jobs| jobs.get(&id).cloned())
    }

    /// Makes every queued job due now.
    pub fn fast_forward(&self) {
        let now = Utc::now();
        self.with_jobs(|jobs| {
            for job in jobs.values_mut().filter(|j| j.status == JobStatus::Queued) {
                job.run_at = now;
            }
        });
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let now = Utc::now();
        let (backoff_base_ms, backoff_max_ms) = options.policy.backoff.as_millis_pair();
        let job = Job {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: options.policy.max_attempts,
            backoff_base_ms,
            backoff_max_ms,
            run_at: now + chrono_delay(options.delay),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let id = job.id;
        self.with_jobs(|jobs| jobs.insert(id, job));
        Ok(id)
    }

    async fn reserve(&self, queues: &[String]) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        Ok(self.with_jobs(|jobs| {
            let next = jobs
                .values_mut()
                .filter(|j| j.status == JobStatus::Queued && j.run_at <= now)
                .filter(|j| queues.is_empty() || queues.contains(&j.queue))
                .min_by_key(|j| (j.run_at, j.created_at, j.id))?;
            next.status = JobStatus::Running;
            next.attempts += 1;
            next.updated_at = now;
            Some(next.clone())
        }))
    }

    async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        self.with_jobs(|jobs| {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Completed;
                job.updated_at = Utc::now();
            }
        });
        Ok(())
    }

    async fn retry(&self, id: JobId, run_at: DateTime<Utc>, error: &str) -> Result<(), QueueError> {
        self.with_jobs(|jobs| {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Queued;
                job.run_at = run_at;
                job.last_error = Some(error.to_string());
                job.updated_at = Utc::now();
            }
        });
        Ok(())
    }

    async fn dead_letter(&self, id: JobId, error: &str) -> Result<(), QueueError> {
        self.with_jobs(|jobs| {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Dead;
                job.last_error = Some(error.to_string());
                job.updated_at = Utc::now();
            }
        });
        Ok(())
    }

    async fn list_dead(&self, limit: i64) -> Result<Vec<Job>, QueueError> {
        Ok(self.with_jobs(|jobs| {
            let mut dead: Vec<Job> = jobs
                .values()
                .filter(|j| j.status == JobStatus::Dead)
                .cloned()
                .collect();
            dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
            dead.truncate(limit.max(0) as usize);
            dead
        }))
    }

    async fn requeue_dead(&self, id: JobId) -> Result<bool, QueueError> {
        Ok(self.with_jobs(|jobs| match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Dead => {
                let now = Utc::now();
                job.status = JobStatus::Queued;
                job.attempts = 0;
                job.run_at = now;
                job.updated_at = now;
                true
            }
            _ => false,
        }))
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - chrono_delay(older_than);
        Ok(self.with_jobs(|jobs| {
            let mut reclaimed = 0;
            for job in jobs
                .values_mut()
                .filter(|j| j.status == JobStatus::Running && j.updated_at < cutoff)
            {
                job.status = JobStatus::Queued;
                job.run_at = Utc::now();
                reclaimed += 1;
            }
            reclaimed
        }))
    }
}
