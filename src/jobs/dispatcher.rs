use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::policy::RetryDecision;
use super::queue::{chrono_delay, Job, JobQueue, QueueError};
use super::JobError;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// A job running longer than this is assumed orphaned by a dead worker.
    pub stale_after: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// What happened to a job after one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying { delay: Duration },
    DeadLettered { reason: String },
}

/// Pulls jobs from the queue and routes them to handlers by queue name.
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, config: DispatcherConfig) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            config,
        }
    }

    pub fn register(mut self, queue: &str, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(queue.to_string(), handler);
        self
    }

    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Claims and processes one job. `None` when nothing was due.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, QueueError> {
        // Reserve from every queue so jobs nobody handles end up dead-lettered
        // instead of sitting queued forever.
        let Some(job) = self.queue.reserve(&[]).await? else {
            return Ok(None);
        };
        self.process(job).await.map(Some)
    }

    async fn process(&self, job: Job) -> Result<JobOutcome, QueueError> {
        let Some(handler) = self.handlers.get(&job.queue) else {
            let reason = format!("no handler registered for queue '{}'", job.queue);
            warn!(job_id = %job.id, queue = %job.queue, "Dead-lettering job: {}", reason);
            self.queue.dead_letter(job.id, &reason).await?;
            return Ok(JobOutcome::DeadLettered { reason });
        };

        debug!(job_id = %job.id, queue = %job.queue, attempt = job.attempts, "Processing job");

        match handler.handle(&job).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                debug!(job_id = %job.id, queue = %job.queue, "Job completed");
                Ok(JobOutcome::Completed)
            }
            Err(JobError::Permanent(reason)) => {
                error!(job_id = %job.id, queue = %job.queue, error = %reason, "Job failed permanently");
                self.queue.dead_letter(job.id, &reason).await?;
                Ok(JobOutcome::DeadLettered { reason })
            }
            Err(JobError::Retryable(reason)) => match job.policy().decide(job.attempts) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        job_id = %job.id,
                        queue = %job.queue,
                        attempt = job.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Job failed, retrying"
                    );
                    self.queue
                        .retry(job.id, Utc::now() + chrono_delay(delay), &reason)
                        .await?;
                    Ok(JobOutcome::Retrying { delay })
                }
                RetryDecision::DeadLetter => {
                    error!(
                        job_id = %job.id,
                        queue = %job.queue,
                        attempts = job.attempts,
                        error = %reason,
                        "Job exhausted retries"
                    );
                    self.queue.dead_letter(job.id, &reason).await?;
                    Ok(JobOutcome::DeadLettered { reason })
                }
            },
        }
    }

    /// Starts the worker pool and the stale-job reclaimer.
    pub fn spawn(self) -> DispatcherHandle {
        let dispatcher = Arc::new(self);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(dispatcher.config.concurrency + 1);

        for worker_id in 0..dispatcher.config.concurrency.max(1) {
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher.worker_loop(worker_id, shutdown).await;
            }));
        }

        let reclaimer = Arc::clone(&dispatcher);
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            reclaimer.reclaim_loop(shutdown).await;
        }));

        info!(
            concurrency = dispatcher.config.concurrency,
            queues = ?dispatcher.queues(),
            "Job dispatcher started"
        );

        DispatcherHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            // A job that has been picked up runs to completion; shutdown is
            // only observed between jobs.
            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id, "Job queue error: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        debug!(worker_id, "Job worker stopped");
    }

    async fn reclaim_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.stale_after.max(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            match self.queue.reclaim_stale(self.config.stale_after).await {
                Ok(0) => {}
                Ok(n) => warn!(reclaimed = n, "Reclaimed stale running jobs"),
                Err(e) => error!("Failed to reclaim stale jobs: {}", e),
            }
        }
    }
}

/// Running worker pool. Dropping it also stops the workers, but without
/// waiting for them.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Signals every worker and waits for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Job worker panicked: {}", e);
            }
        }
        info!("Job dispatcher stopped");
    }
}
