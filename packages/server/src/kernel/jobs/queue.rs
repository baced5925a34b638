//! PostgreSQL-backed job queue implementation.
//!
//! Jobs are keyed by `(reference_id, job_type)`: enqueueing the same reference
//! twice reuses one row. Workers claim with `FOR UPDATE SKIP LOCKED` and hold a
//! lease that heartbeats renew; a running job whose lease expired is treated
//! as stalled and becomes claimable again.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::job::{retry_backoff, FailureKind, Job, JobStatus};
use crate::common::JobId;

/// Result type for enqueue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// A fresh job row was created, or a finished one was reset to pending
    Created(JobId),
    /// A job for the same reference was already pending; its payload was refreshed
    Duplicate(JobId),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or duplicate
    pub fn job_id(&self) -> JobId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Metadata for job payloads.
pub trait CommandMeta {
    /// The job type name (used as job_type).
    fn command_type(&self) -> &'static str;

    /// The entity the job works on.
    fn reference_id(&self) -> Uuid;

    /// Maximum retries for this job.
    fn max_retries(&self) -> i32 {
        3
    }
}

/// Serialized job ready to be written to a queue.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub job_type: String,
    pub reference_id: Uuid,
    pub args: serde_json::Value,
    pub max_retries: i32,
}

impl EnqueueRequest {
    pub fn from_command<C>(command: &C) -> Result<Self>
    where
        C: Serialize + CommandMeta,
    {
        Ok(Self {
            job_type: command.command_type().to_string(),
            reference_id: command.reference_id(),
            args: serde_json::to_value(command)?,
            max_retries: command.max_retries(),
        })
    }
}

/// One claim of a job by a worker.
///
/// `attempt` increases with every claim of the row, so two claims by the same
/// worker id are still told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLease {
    pub job_id: JobId,
    pub worker_id: String,
    pub attempt: i32,
}

impl JobLease {
    pub fn new(job_id: JobId, worker_id: impl Into<String>, attempt: i32) -> Self {
        Self {
            job_id,
            worker_id: worker_id.into(),
            attempt,
        }
    }
}

/// A claimed job ready for execution.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub job_type: String,
    pub reference_id: Uuid,
    pub args: serde_json::Value,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Worker holding the lease
    pub worker_id: String,
    /// Claim counter of the row at the time of this claim
    pub attempt: i32,
}

impl ClaimedJob {
    /// Deserialize the payload.
    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        serde_json::from_value(self.args.clone())
            .map_err(|e| anyhow!("failed to deserialize {} job {}: {}", self.job_type, self.id, e))
    }

    pub fn lease(&self) -> JobLease {
        JobLease::new(self.id, self.worker_id.clone(), self.attempt)
    }

    fn from_job(job: Job, worker_id: &str) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            reference_id: job.reference_id,
            args: job.args,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            worker_id: worker_id.to_string(),
            attempt: job.attempt,
        }
    }
}

/// Trait for job queue operations.
///
/// Mutations on a claimed job are scoped to the [`JobLease`] of that claim, so
/// a worker whose job was reclaimed or re-enqueued cannot overwrite the newer
/// state.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for immediate execution.
    async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResult>;

    /// Cancel a pending job by its reference. Returns false when nothing was pending.
    async fn cancel_by_reference(&self, reference_id: Uuid, job_type: &str) -> Result<bool>;

    /// Claim up to `limit` jobs for processing.
    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>>;

    /// Extend the lease for a running job.
    async fn heartbeat(&self, lease: &JobLease) -> Result<()>;

    /// Record progress (0-100) for a running job.
    async fn report_progress(&self, lease: &JobLease, progress: u8) -> Result<()>;

    /// Mark a job as successfully completed.
    async fn mark_succeeded(&self, lease: &JobLease) -> Result<()>;

    /// Mark a job as failed.
    ///
    /// If the failure is retryable and retries remain, the job is rescheduled
    /// with exponential backoff. Otherwise it is dead-lettered (or cancelled).
    async fn mark_failed(&self, lease: &JobLease, error: &str, kind: FailureKind) -> Result<()>;

    /// Look up the job for a reference.
    async fn find_by_reference(&self, reference_id: Uuid, job_type: &str) -> Result<Option<Job>>;
}

#[derive(sqlx::FromRow)]
struct EnqueueRow {
    id: JobId,
    previous_status: Option<JobStatus>,
}

/// PostgreSQL-backed job queue implementation.
pub struct PostgresJobQueue {
    pool: PgPool,
    lease_duration_ms: i64,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_duration_ms: 60_000,
        }
    }

    /// Create with a custom lease duration.
    pub fn with_lease_duration(pool: PgPool, lease_duration_ms: i64) -> Self {
        Self {
            pool,
            lease_duration_ms,
        }
    }

    pub fn lease_duration_ms(&self) -> i64 {
        self.lease_duration_ms
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResult> {
        // The CTE reads the row as it was before this statement.
        let row = sqlx::query_as::<_, EnqueueRow>(
            r#"
            WITH previous AS (
                SELECT status FROM jobs WHERE reference_id = $2 AND job_type = $3
            )
            INSERT INTO jobs (id, reference_id, job_type, args, max_retries)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (reference_id, job_type) DO UPDATE
            SET args = EXCLUDED.args,
                max_retries = EXCLUDED.max_retries,
                status = 'pending',
                progress = 0,
                retry_count = CASE WHEN jobs.status = 'pending' THEN jobs.retry_count ELSE 0 END,
                next_run_at = CASE WHEN jobs.status = 'pending' THEN jobs.next_run_at ELSE NULL END,
                lease_expires_at = NULL,
                worker_id = NULL,
                error_message = NULL,
                error_kind = NULL,
                dead_lettered_at = NULL,
                dead_letter_reason = NULL,
                updated_at = NOW()
            RETURNING id, (SELECT status FROM previous) AS previous_status
            "#,
        )
        .bind(JobId::new())
        .bind(request.reference_id)
        .bind(&request.job_type)
        .bind(&request.args)
        .bind(request.max_retries)
        .fetch_one(&self.pool)
        .await?;

        let result = match row.previous_status {
            Some(JobStatus::Pending) => EnqueueResult::Duplicate(row.id),
            _ => EnqueueResult::Created(row.id),
        };

        info!(
            job_id = %row.id,
            job_type = %request.job_type,
            reference_id = %request.reference_id,
            created = result.is_created(),
            "job enqueued"
        );

        Ok(result)
    }

    async fn cancel_by_reference(&self, reference_id: Uuid, job_type: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                error_kind = 'cancelled',
                updated_at = NOW()
            WHERE reference_id = $1 AND job_type = $2 AND status = 'pending'
            "#,
        )
        .bind(reference_id)
        .bind(job_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE
                    (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= NOW()))
                    OR (status = 'running' AND lease_expires_at < NOW())
                ORDER BY COALESCE(next_run_at, created_at)
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET
                status = 'running',
                lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                worker_id = $3,
                attempt = attempt + 1,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(self.lease_duration_ms.to_string())
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs
            .into_iter()
            .map(|job| ClaimedJob::from_job(job, worker_id))
            .collect())
    }

    async fn heartbeat(&self, lease: &JobLease) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND worker_id = $3 AND attempt = $4 AND status = 'running'
            "#,
        )
        .bind(self.lease_duration_ms.to_string())
        .bind(lease.job_id)
        .bind(&lease.worker_id)
        .bind(lease.attempt)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn report_progress(&self, lease: &JobLease, progress: u8) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = $1, updated_at = NOW()
            WHERE id = $2 AND worker_id = $3 AND attempt = $4 AND status = 'running'
            "#,
        )
        .bind(progress.min(100) as i16)
        .bind(lease.job_id)
        .bind(&lease.worker_id)
        .bind(lease.attempt)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_succeeded(&self, lease: &JobLease) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                progress = 100,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND attempt = $3 AND status = 'running'
            "#,
        )
        .bind(lease.job_id)
        .bind(&lease.worker_id)
        .bind(lease.attempt)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, lease: &JobLease, error: &str, kind: FailureKind) -> Result<()> {
        let job_id = lease.job_id;
        let Some(job) = Job::find_by_id(job_id, &self.pool).await? else {
            warn!(job_id = %job_id, "cannot mark missing job as failed");
            return Ok(());
        };

        if job.can_retry(kind) {
            let retry_at: DateTime<Utc> = Utc::now() + retry_backoff(job.retry_count);

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    next_run_at = $1,
                    lease_expires_at = NULL,
                    worker_id = NULL,
                    error_message = $2,
                    error_kind = $3,
                    updated_at = NOW()
                WHERE id = $4 AND worker_id = $5 AND attempt = $6 AND status = 'running'
                "#,
            )
            .bind(retry_at)
            .bind(error)
            .bind(kind)
            .bind(job_id)
            .bind(&lease.worker_id)
            .bind(lease.attempt)
            .execute(&self.pool)
            .await?;

            info!(job_id = %job_id, retry_at = %retry_at, "job rescheduled for retry");
        } else if kind == FailureKind::Cancelled {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'cancelled',
                    error_message = $1,
                    error_kind = 'cancelled',
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $2 AND worker_id = $3 AND attempt = $4 AND status = 'running'
                "#,
            )
            .bind(error)
            .bind(job_id)
            .bind(&lease.worker_id)
            .bind(lease.attempt)
            .execute(&self.pool)
            .await?;
        } else {
            let reason = if kind.should_retry() {
                "max retries exceeded"
            } else {
                "non-retryable failure"
            };

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_letter',
                    error_message = $1,
                    error_kind = $2,
                    dead_lettered_at = NOW(),
                    dead_letter_reason = $3,
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $4 AND worker_id = $5 AND attempt = $6 AND status = 'running'
                "#,
            )
            .bind(error)
            .bind(kind)
            .bind(reason)
            .bind(job_id)
            .bind(&lease.worker_id)
            .bind(lease.attempt)
            .execute(&self.pool)
            .await?;

            warn!(job_id = %job_id, reason, "job dead-lettered");
        }

        Ok(())
    }

    async fn find_by_reference(&self, reference_id: Uuid, job_type: &str) -> Result<Option<Job>> {
        Job::find_by_reference(reference_id, job_type, &self.pool).await
    }
}
