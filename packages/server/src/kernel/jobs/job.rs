//! Job model for background work.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::common::JobId;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    DeadLetter,
    Cancelled,
}

impl JobStatus {
    /// Waiting for, or currently held by, a worker.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "failure_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Job was cancelled by user/system
    Cancelled,
    /// Job was interrupted by graceful shutdown - will retry
    Shutdown,
}

impl FailureKind {
    /// Whether this failure kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, FailureKind::Retryable | FailureKind::Shutdown)
    }
}

/// Delay before the next attempt: 2^retry_count seconds, capped at one hour.
pub fn retry_backoff(retry_count: i32) -> chrono::Duration {
    let exponent = retry_count.clamp(0, 12) as u32;
    chrono::Duration::seconds(2i64.pow(exponent).min(3600))
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub reference_id: Uuid,
    pub job_type: String,
    pub args: serde_json::Value,
    pub status: JobStatus,
    pub progress: i16,
    pub max_retries: i32,
    pub retry_count: i32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    /// Number of times the row has been claimed
    pub attempt: i32,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
    pub dead_letter_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub async fn find_by_id(id: JobId, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(job)
    }

    /// Find a job by reference_id and job_type
    pub async fn find_by_reference(
        reference_id: Uuid,
        job_type: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(
            "SELECT * FROM jobs WHERE reference_id = $1 AND job_type = $2",
        )
        .bind(reference_id)
        .bind(job_type)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Check if the job is ready to be claimed
    pub fn is_ready(&self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }

        match self.next_run_at {
            Some(at) => at <= Utc::now(),
            None => true,
        }
    }

    /// Whether a failure of the given kind leaves another attempt.
    pub fn can_retry(&self, kind: FailureKind) -> bool {
        kind.should_retry() && self.retry_count < self.max_retries
    }
}
