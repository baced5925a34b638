//! Job worker service for processing background jobs.
//!
//! The `JobWorker` is a long-running service that:
//! - Claims ready jobs from a [`JobQueue`] while it has free concurrency permits
//! - Dispatches each job to the [`JobHandler`] registered for its type
//! - Renews the job lease with a heartbeat while the handler runs
//! - Marks jobs succeeded or failed (retry / dead letter)
//! - On shutdown stops claiming and drains in-flight jobs within a grace period
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► claim(free permits)
//!     ├─► spawn per job ──► JobHandler::handle(job, ctx)
//!     │                        └─► heartbeat task
//!     └─► mark_succeeded / mark_failed
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::FailureKind;
use super::queue::{ClaimedJob, JobLease, JobQueue};
use crate::common::JobId;
use crate::kernel::service_host::Service;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Maximum number of jobs running at once
    pub concurrency: usize,
    /// How long to wait when no jobs are available
    pub poll_interval: Duration,
    /// How often to send heartbeats for running jobs
    pub heartbeat_interval: Duration,
    /// How long in-flight jobs may keep running after shutdown is requested
    pub shutdown_grace: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(20),
            shutdown_grace: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }
}

/// Failure returned by a [`JobHandler`].
#[derive(Debug)]
pub struct JobFailure {
    pub message: String,
    pub kind: FailureKind,
}

impl JobFailure {
    pub fn retryable(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
            kind: FailureKind::Retryable,
        }
    }

    pub fn non_retryable(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
            kind: FailureKind::NonRetryable,
        }
    }

    pub fn shutdown() -> Self {
        Self {
            message: "worker shutting down".to_string(),
            kind: FailureKind::Shutdown,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<anyhow::Error> for JobFailure {
    fn from(e: anyhow::Error) -> Self {
        Self::retryable(format!("{:#}", e))
    }
}

/// Per-execution handle passed to handlers.
#[derive(Clone)]
pub struct JobContext {
    pub lease: JobLease,
    queue: Arc<dyn JobQueue>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(lease: JobLease, queue: Arc<dyn JobQueue>, cancel: CancellationToken) -> Self {
        Self {
            lease,
            queue,
            cancel,
        }
    }

    /// Context for a claimed job outside of a worker loop (tests, one-off runs).
    pub fn for_job(job: &ClaimedJob, queue: Arc<dyn JobQueue>) -> Self {
        Self::new(job.lease(), queue, CancellationToken::new())
    }

    pub fn job_id(&self) -> JobId {
        self.lease.job_id
    }

    /// Fires when the worker needs the job to stop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Best effort: a failed progress write is logged and ignored.
    pub async fn report_progress(&self, progress: u8) {
        if let Err(e) = self.queue.report_progress(&self.lease, progress).await {
            debug!(job_id = %self.lease.job_id, error = %e, "failed to report job progress");
        }
    }
}

/// Executes one type of job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job_type this handler consumes.
    fn job_type(&self) -> &'static str;

    async fn handle(&self, job: &ClaimedJob, ctx: &JobContext) -> Result<(), JobFailure>;
}

/// A job worker that processes jobs from a queue.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(queue: Arc<dyn JobQueue>, config: JobWorkerConfig) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register a handler for its job type.
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.job_type(), handler);
        self
    }

    pub fn config(&self) -> &JobWorkerConfig {
        &self.config
    }

    fn handler_for(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Claim as many jobs as there are free permits and spawn them.
    /// Returns the number of jobs started.
    async fn claim_and_spawn(
        &self,
        permits: &Arc<Semaphore>,
        running: &mut JoinSet<()>,
        job_cancel: &CancellationToken,
    ) -> Result<usize> {
        let available = permits.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let jobs = self
            .queue
            .claim(&self.config.worker_id, available as i64)
            .await?;
        let count = jobs.len();

        for job in jobs {
            let permit = permits.clone().acquire_owned().await?;
            let queue = self.queue.clone();
            let handler = self.handler_for(&job.job_type);
            let heartbeat_interval = self.config.heartbeat_interval;
            let cancel = job_cancel.child_token();

            running.spawn(async move {
                process_job(queue, handler, job, heartbeat_interval, cancel).await;
                drop(permit);
            });
        }

        Ok(count)
    }
}

/// Process a single claimed job.
async fn process_job(
    queue: Arc<dyn JobQueue>,
    handler: Option<Arc<dyn JobHandler>>,
    job: ClaimedJob,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
) {
    let job_id = job.id;
    let lease = job.lease();

    let Some(handler) = handler else {
        error!(job_id = %job_id, job_type = %job.job_type, "no handler registered for job type");
        let message = format!("unknown job type: {}", job.job_type);
        if let Err(e) = queue
            .mark_failed(&lease, &message, FailureKind::NonRetryable)
            .await
        {
            error!(job_id = %job_id, error = %e, "failed to mark job as failed");
        }
        return;
    };

    // Spawn heartbeat task
    let heartbeat_stop = CancellationToken::new();
    let heartbeat_handle = {
        let queue = queue.clone();
        let lease = lease.clone();
        let stop = heartbeat_stop.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // Skip first immediate tick
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.heartbeat(&lease).await {
                            warn!(job_id = %job_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        })
    };

    let ctx = JobContext::new(lease.clone(), queue.clone(), cancel);
    let result = handler.handle(&job, &ctx).await;

    heartbeat_stop.cancel();
    let _ = heartbeat_handle.await;

    match result {
        Ok(()) => {
            debug!(job_id = %job_id, job_type = %job.job_type, "job succeeded");
            if let Err(e) = queue.mark_succeeded(&lease).await {
                error!(job_id = %job_id, error = %e, "failed to mark job as succeeded");
            }
        }
        Err(failure) => {
            warn!(
                job_id = %job_id,
                job_type = %job.job_type,
                kind = ?failure.kind,
                error = %failure.message,
                "job failed"
            );
            if let Err(e) = queue
                .mark_failed(&lease, &failure.message, failure.kind)
                .await
            {
                error!(job_id = %job_id, error = %e, "failed to mark job as failed");
            }
        }
    }
}

#[async_trait]
impl Service for JobWorker {
    fn name(&self) -> &'static str {
        "job-worker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            job_types = ?self.handlers.keys().collect::<Vec<_>>(),
            "job worker starting"
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut running = JoinSet::new();
        // Separate from `shutdown` so in-flight jobs get the grace period.
        let job_cancel = CancellationToken::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // Reap finished tasks
            while running.try_join_next().is_some() {}

            let started = match self.claim_and_spawn(&permits, &mut running, &job_cancel).await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    0
                }
            };

            if started > 0 {
                debug!(count = started, "claimed jobs");
                continue;
            }

            // Nothing claimed: wait for a slot to free up, new work, or shutdown.
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                Some(_) = running.join_next(), if !running.is_empty() => {}
            }
        }

        if !running.is_empty() {
            info!(count = running.len(), "waiting for running jobs to complete");

            let drained = tokio::time::timeout(self.config.shutdown_grace, async {
                while running.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    count = running.len(),
                    "grace period elapsed, cancelling running jobs"
                );
                job_cancel.cancel();
                let _ = tokio::time::timeout(Duration::from_secs(5), async {
                    while running.join_next().await.is_some() {}
                })
                .await;
                running.abort_all();
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }
}
