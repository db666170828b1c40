//! Async job dispatcher: named queues, retry policy, dead letters and a
//! bounded worker pool.

pub mod dispatcher;
pub mod handlers;
pub mod payloads;
pub mod pg_queue;
pub mod policy;
pub mod queue;

use thiserror::Error;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle, JobHandler, JobOutcome};
pub use handlers::{NotificationHandler, TransferHandler};
pub use payloads::{
    enqueue, NotificationJob, QueuedJob, TransferJob, NOTIFICATIONS_QUEUE, TRANSFERS_QUEUE,
};
pub use pg_queue::PgJobQueue;
pub use policy::{Backoff, RetryDecision, RetryPolicy};
pub use queue::{EnqueueOptions, Job, JobId, JobQueue, JobStatus, MemoryJobQueue, QueueError};

/// Failure reported by a job handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Worth another attempt under the job's retry policy.
    #[error("{0}")]
    Retryable(String),
    /// Will never succeed; dead-letter immediately.
    #[error("{0}")]
    Permanent(String),
}
