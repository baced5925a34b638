//! Job infrastructure for background work.
//!
//! - [`PostgresJobQueue`] - database-backed queue keyed by `(reference_id, job_type)`
//! - [`JobWorker`] - long-running service that claims and executes jobs
//! - [`JobHandler`] - per-job-type execution, implemented in the domains
//!
//! ```text
//! domain action ──► JobQueue::enqueue(EnqueueRequest)
//!                        └─► INSERT .. ON CONFLICT (reference_id, job_type)
//!
//! JobWorker
//!     ├─► claim (FOR UPDATE SKIP LOCKED, stalled leases included)
//!     ├─► JobHandler::handle(job, ctx)
//!     └─► mark_succeeded / mark_failed (retry with backoff, dead letter)
//! ```
//!
//! Handlers live in their respective domains. This module only provides the
//! infrastructure.

mod job;
mod queue;
mod worker;

pub use job::{retry_backoff, FailureKind, Job, JobStatus};
pub use queue::{
    ClaimedJob, CommandMeta, EnqueueRequest, EnqueueResult, JobLease, JobQueue, PostgresJobQueue,
};
pub use worker::{JobContext, JobFailure, JobHandler, JobWorker, JobWorkerConfig};
