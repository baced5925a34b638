use tracing::{info, warn};
use url::Url;

use super::create::{crawl_allowance, insert, parse_crawl_url, queue_crawl, to_provider_limit};
use super::emit_updated;
use crate::common::{LinkSourceId, OrganizationId, UserId};
use crate::domains::crawling::cancel_crawl_job;
use crate::domains::link_sources::errors::{LinkSourceError, LinkSourceResult};
use crate::domains::link_sources::models::{LinkSource, LinkSourcePatch, NewLinkSource};
use crate::domains::quota::QuotaSnapshot;
use crate::kernel::ServerDeps;

pub const CANCELLED_MESSAGE: &str = "Crawl cancelled";

/// Crawl a finished source again.
///
/// The reset and the page-allowance computation happen in one transaction
/// holding the organization lock, and a source already waiting or crawling
/// is refused.
pub async fn recrawl_link_source(
    link_source_id: LinkSourceId,
    organization_id: OrganizationId,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    let features = deps.plans.features_for(organization_id).await?;
    let quota = QuotaSnapshot::from_features(&features);

    let mut tx = deps.db_pool.begin().await?;
    LinkSource::lock_organization(organization_id, &mut *tx).await?;

    let current = LinkSource::lock_for_update(link_source_id, organization_id, &mut *tx)
        .await?
        .ok_or(LinkSourceError::NotFound)?;
    if current.status.is_in_flight() {
        return Err(LinkSourceError::AlreadyCrawling);
    }

    let source = LinkSource::reset_for_recrawl(link_source_id, &mut *tx).await?;
    let usage =
        LinkSource::usage_for_organization(organization_id, Some(link_source_id), &mut *tx).await?;
    tx.commit().await?;

    let crawl_limit = to_provider_limit(quota.crawl_limit(usage.pages), deps);
    info!(
        link_source_id = %link_source_id,
        previous_status = %current.status,
        crawl_limit,
        "Recrawl requested"
    );

    queue_crawl(source, crawl_limit, deps).await
}

/// Create a child source limited to the subtree under `page_url` and crawl it.
pub async fn scan_subpages(
    parent_id: LinkSourceId,
    organization_id: OrganizationId,
    page_url: &str,
    created_by: Option<UserId>,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    let parent = LinkSource::find_for_organization(parent_id, organization_id, &deps.db_pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    let url = parse_crawl_url(page_url)?;
    let include_paths = subtree_paths(&parent.url, &url)?;

    if LinkSource::find_by_url(parent.website_id, parent.ai_agent_id, &url, &deps.db_pool)
        .await?
        .is_some()
    {
        return Err(LinkSourceError::Conflict);
    }

    let child = NewLinkSource::builder()
        .organization_id(organization_id)
        .website_id(parent.website_id)
        .url(url)
        .ai_agent_id(parent.ai_agent_id)
        .parent_link_source_id(Some(parent.id))
        .include_paths(include_paths)
        .exclude_paths(parent.exclude_paths.clone())
        .max_depth(parent.max_depth)
        .depth(parent.depth + 1)
        .created_by(created_by)
        .build();

    let source = insert(&child, deps).await?;
    info!(
        link_source_id = %source.id,
        parent_link_source_id = %parent.id,
        depth = source.depth,
        "Subpage scan created"
    );

    let crawl_limit = crawl_allowance(organization_id, source.id, deps).await?;
    queue_crawl(source, crawl_limit, deps).await
}

/// Include pattern covering `page_url` and everything below it. The page has
/// to be on the parent's host.
fn subtree_paths(parent_url: &str, page_url: &str) -> LinkSourceResult<Vec<String>> {
    let parent = Url::parse(parent_url).map_err(|e| LinkSourceError::Internal(e.into()))?;
    let page = Url::parse(page_url).map_err(|e| LinkSourceError::InvalidInput(e.to_string()))?;

    if parent.host_str() != page.host_str() {
        return Err(LinkSourceError::InvalidInput(format!(
            "{} is not on {}",
            page_url,
            parent.host_str().unwrap_or_default()
        )));
    }

    let path = page.path().trim_end_matches('/');
    if path.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![format!("{}(/.*)?$", path)])
}

/// Stop a queued or running crawl. Removing the queued job and cancelling
/// the provider job are attempted independently; neither failure blocks the
/// source from being marked failed.
pub async fn cancel_crawl(
    link_source_id: LinkSourceId,
    organization_id: OrganizationId,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    let source = LinkSource::find_for_organization(link_source_id, organization_id, &deps.db_pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    if source.status.is_terminal() {
        return Ok(source);
    }

    stop_outstanding_work(&source, deps).await;

    let cancelled = LinkSource::mark_failed(source.id, CANCELLED_MESSAGE, &deps.db_pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;
    info!(link_source_id = %source.id, "Crawl cancelled by user");

    emit_updated(&cancelled, deps).await;
    Ok(cancelled)
}

/// Soft delete a source and its pages. In-flight crawls are cancelled on a
/// best-effort basis first.
pub async fn delete_link_source(
    link_source_id: LinkSourceId,
    organization_id: OrganizationId,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    let source = LinkSource::find_for_organization(link_source_id, organization_id, &deps.db_pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    if source.status.is_in_flight() {
        stop_outstanding_work(&source, deps).await;
    }

    let deleted = LinkSource::soft_delete(source.id, &deps.db_pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;
    info!(link_source_id = %source.id, "Link source deleted");

    emit_updated(&deleted, deps).await;
    Ok(deleted)
}

/// Partial update of a source's configuration or counters.
pub async fn update_link_source(
    link_source_id: LinkSourceId,
    organization_id: OrganizationId,
    patch: LinkSourcePatch,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    LinkSource::find_for_organization(link_source_id, organization_id, &deps.db_pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    let updated = LinkSource::update(link_source_id, &patch, &deps.db_pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    emit_updated(&updated, deps).await;
    Ok(updated)
}

async fn stop_outstanding_work(source: &LinkSource, deps: &ServerDeps) {
    let queue_cancel = async {
        if let Err(e) = cancel_crawl_job(deps.job_queue.as_ref(), source.id).await {
            warn!(link_source_id = %source.id, error = %e, "Failed to remove queued crawl job");
        }
    };

    let provider_cancel = async {
        let (Some(provider), Some(job_id)) = (&deps.crawl_provider, &source.firecrawl_job_id) else {
            return;
        };
        if let Err(e) = provider.cancel_crawl(job_id).await {
            warn!(
                link_source_id = %source.id,
                firecrawl_job_id = %job_id,
                error = %e,
                "Failed to cancel provider crawl"
            );
        }
    };

    futures::join!(queue_cancel, provider_cancel);
}
