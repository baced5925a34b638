use tracing::{error, info, warn};
use url::Url;

use super::emit_updated;
use crate::common::{AiAgentId, LinkSourceId, OrganizationId, UserId, WebsiteId};
use crate::domains::crawling::{enqueue_crawl, CrawlLinkSourceJob};
use crate::domains::link_sources::errors::{LinkSourceError, LinkSourceResult};
use crate::domains::link_sources::models::{LinkSource, NewLinkSource};
use crate::domains::quota::{Limit, QuotaSnapshot};
use crate::kernel::ServerDeps;

/// Error message stored on a source whose crawl job could not be queued.
pub const ENQUEUE_FAILED_MESSAGE: &str = "Failed to queue crawl job. Please try again.";

#[derive(Debug, Clone)]
pub struct CreateLinkSourceInput {
    pub website_id: WebsiteId,
    pub ai_agent_id: Option<AiAgentId>,
    pub url: String,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub max_depth: Option<u32>,
    pub created_by: Option<UserId>,
}

impl CreateLinkSourceInput {
    pub fn new(website_id: WebsiteId, url: impl Into<String>) -> Self {
        Self {
            website_id,
            ai_agent_id: None,
            url: url.into(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            max_depth: None,
            created_by: None,
        }
    }
}

/// Register a link source and queue its first crawl.
///
/// When the job cannot be queued the source comes back marked failed rather
/// than as an error, so it is never left pending without a job.
pub async fn create_link_source(
    organization_id: OrganizationId,
    input: CreateLinkSourceInput,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    let url = parse_crawl_url(&input.url)?;
    let pool = &deps.db_pool;

    let features = deps.plans.features_for(organization_id).await?;
    let quota = QuotaSnapshot::from_features(&features);
    let active = LinkSource::count_active_for_organization(organization_id, pool).await?;
    if !quota.link_source_limit.allows(active.max(0) as u64 + 1) {
        return Err(LinkSourceError::QuotaExceeded {
            resource: "link sources",
            limit: quota.link_source_limit,
        });
    }

    if LinkSource::find_by_url(input.website_id, input.ai_agent_id, &url, pool)
        .await?
        .is_some()
    {
        return Err(LinkSourceError::Conflict);
    }

    let new_source = NewLinkSource::builder()
        .organization_id(organization_id)
        .website_id(input.website_id)
        .url(url)
        .ai_agent_id(input.ai_agent_id)
        .include_paths(input.include_paths)
        .exclude_paths(input.exclude_paths)
        .max_depth(input.max_depth.map(|d| d.min(i32::MAX as u32) as i32))
        .created_by(input.created_by)
        .build();

    let source = insert(&new_source, deps).await?;
    info!(
        link_source_id = %source.id,
        organization_id = %organization_id,
        url = %source.url,
        "Link source created"
    );

    let crawl_limit = crawl_allowance(organization_id, source.id, deps).await?;
    queue_crawl(source, crawl_limit, deps).await
}

/// Insert, mapping a lost uniqueness race to Conflict.
pub(super) async fn insert(input: &NewLinkSource, deps: &ServerDeps) -> LinkSourceResult<LinkSource> {
    LinkSource::create(input, &deps.db_pool).await.map_err(|e| {
        let unique_violation = e
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .is_some_and(|db| db.is_unique_violation());
        if unique_violation {
            LinkSourceError::Conflict
        } else {
            LinkSourceError::Internal(e)
        }
    })
}

/// Only absolute http(s) URLs can be crawled.
pub(super) fn parse_crawl_url(raw: &str) -> LinkSourceResult<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| LinkSourceError::InvalidInput(format!("invalid url '{}': {}", trimmed, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(trimmed.to_string()),
        _ => Err(LinkSourceError::InvalidInput(format!(
            "url must be http(s) with a host: {}",
            trimmed
        ))),
    }
}

/// Page allowance for one crawl of `link_source_id`, computed while holding
/// the organization lock. Pages already held by this source are not counted.
pub(super) async fn crawl_allowance(
    organization_id: OrganizationId,
    link_source_id: LinkSourceId,
    deps: &ServerDeps,
) -> LinkSourceResult<u64> {
    let features = deps.plans.features_for(organization_id).await?;
    let quota = QuotaSnapshot::from_features(&features);

    let mut tx = deps.db_pool.begin().await?;
    LinkSource::lock_organization(organization_id, &mut *tx).await?;
    let usage =
        LinkSource::usage_for_organization(organization_id, Some(link_source_id), &mut *tx).await?;
    tx.commit().await?;

    Ok(to_provider_limit(quota.crawl_limit(usage.pages), deps))
}

pub(super) fn to_provider_limit(limit: Limit, deps: &ServerDeps) -> u64 {
    limit
        .as_finite()
        .unwrap_or(deps.crawl_settings.unlimited_page_cap)
}

/// Enqueue the crawl for a pending source. An enqueue failure marks the
/// source failed and returns it.
pub(super) async fn queue_crawl(
    source: LinkSource,
    crawl_limit: u64,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    let job = CrawlLinkSourceJob::for_source(&source, crawl_limit);

    match enqueue_crawl(deps.job_queue.as_ref(), &job).await {
        Ok(_) => {
            emit_updated(&source, deps).await;
            Ok(source)
        }
        Err(e) => {
            error!(link_source_id = %source.id, error = %e, "Failed to enqueue crawl job");
            match LinkSource::mark_failed(source.id, ENQUEUE_FAILED_MESSAGE, &deps.db_pool).await? {
                Some(failed) => {
                    emit_updated(&failed, deps).await;
                    Ok(failed)
                }
                None => {
                    warn!(link_source_id = %source.id, "Link source vanished while enqueueing");
                    Err(LinkSourceError::NotFound)
                }
            }
        }
    }
}
