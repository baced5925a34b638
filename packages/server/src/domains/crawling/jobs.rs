//! CrawlLinkSourceJob - background job that crawls one link source.
//!
//! Request handlers enqueue this job and return immediately; the crawl
//! worker picks it up and drives the provider.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::{AiAgentId, LinkSourceId, OrganizationId, UserId, WebsiteId};
use crate::domains::link_sources::models::LinkSource;
use crate::kernel::jobs::{CommandMeta, EnqueueRequest, EnqueueResult, JobQueue};

/// Job payload. `crawl_limit` is the page ceiling computed when the job was
/// enqueued.
///
/// ```ignore
/// let job = CrawlLinkSourceJob::for_source(&source, crawl_limit);
/// enqueue_crawl(deps.job_queue.as_ref(), &job).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlLinkSourceJob {
    pub link_source_id: LinkSourceId,
    pub website_id: WebsiteId,
    pub organization_id: OrganizationId,
    pub ai_agent_id: Option<AiAgentId>,
    pub url: String,
    pub crawl_limit: u64,
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    pub max_depth: Option<u32>,
}

impl CrawlLinkSourceJob {
    /// The job type identifier used in the jobs table.
    pub const JOB_TYPE: &'static str = "crawl_link_source";

    pub fn for_source(source: &LinkSource, crawl_limit: u64) -> Self {
        Self {
            link_source_id: source.id,
            website_id: source.website_id,
            organization_id: source.organization_id,
            ai_agent_id: source.ai_agent_id,
            url: source.url.clone(),
            crawl_limit,
            created_by: source.created_by,
            include_paths: source.include_paths.clone(),
            exclude_paths: source.exclude_paths.clone(),
            max_depth: source.max_depth.and_then(|d| u32::try_from(d).ok()),
        }
    }
}

impl CommandMeta for CrawlLinkSourceJob {
    fn command_type(&self) -> &'static str {
        Self::JOB_TYPE
    }

    fn reference_id(&self) -> Uuid {
        self.link_source_id.into_uuid()
    }

    fn max_retries(&self) -> i32 {
        3
    }
}

/// Push a crawl job keyed by its link source.
pub async fn enqueue_crawl(queue: &dyn JobQueue, job: &CrawlLinkSourceJob) -> Result<EnqueueResult> {
    let request = EnqueueRequest::from_command(job)?;
    let result = queue.enqueue(request).await?;

    info!(
        link_source_id = %job.link_source_id,
        job_id = %result.job_id(),
        crawl_limit = job.crawl_limit,
        created = result.is_created(),
        "Crawl job enqueued"
    );

    Ok(result)
}

/// Remove a not-yet-started crawl job. Returns false when there was nothing
/// to remove (already running, finished or never queued).
pub async fn cancel_crawl_job(queue: &dyn JobQueue, link_source_id: LinkSourceId) -> Result<bool> {
    let removed = queue
        .cancel_by_reference(link_source_id.into_uuid(), CrawlLinkSourceJob::JOB_TYPE)
        .await?;

    debug!(link_source_id = %link_source_id, removed, "Crawl job cancel requested");
    Ok(removed)
}
