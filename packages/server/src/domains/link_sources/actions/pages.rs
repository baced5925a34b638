use tracing::info;

use super::emit_updated;
use crate::common::{KnowledgeId, LinkSourceId, OrganizationId};
use crate::domains::link_sources::errors::{LinkSourceError, LinkSourceResult};
use crate::domains::link_sources::models::{Knowledge, KnowledgeOrigin, LinkSource};
use crate::domains::quota::QuotaSnapshot;
use crate::domains::realtime::{EventScope, RealtimeEvent};
use crate::kernel::ServerDeps;

/// Exclude a URL from this and future crawls of the source. A page already
/// stored for it is soft-deleted and taken out of the counters.
pub async fn ignore_url(
    link_source_id: LinkSourceId,
    organization_id: OrganizationId,
    url: &str,
    deps: &ServerDeps,
) -> LinkSourceResult<LinkSource> {
    let pool = &deps.db_pool;
    LinkSource::find_for_organization(link_source_id, organization_id, pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    let removed = Knowledge::soft_delete_by_url(link_source_id, url, pool).await?;
    let (pages, bytes) = removed
        .as_ref()
        .map(|k| (1, k.size_bytes))
        .unwrap_or((0, 0));

    let source = LinkSource::add_ignored_url(link_source_id, url, pages, bytes, pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    info!(
        link_source_id = %link_source_id,
        url = %url,
        removed_page = removed.is_some(),
        "URL ignored"
    );

    emit_updated(&source, deps).await;
    Ok(source)
}

/// Toggle whether a page is used downstream.
pub async fn set_knowledge_included(
    knowledge_id: KnowledgeId,
    organization_id: OrganizationId,
    is_included: bool,
    deps: &ServerDeps,
) -> LinkSourceResult<Knowledge> {
    let pool = &deps.db_pool;
    let knowledge = Knowledge::set_included(knowledge_id, organization_id, is_included, pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    info!(
        knowledge_id = %knowledge_id,
        link_source_id = %knowledge.link_source_id,
        is_included,
        "Page inclusion changed"
    );

    if let Some(source) = LinkSource::find_by_id(knowledge.link_source_id, pool).await? {
        emit_updated(&source, deps).await;
    }
    Ok(knowledge)
}

/// Re-scrape a single page and replace its stored content.
pub async fn reindex_page(
    link_source_id: LinkSourceId,
    organization_id: OrganizationId,
    url: &str,
    deps: &ServerDeps,
) -> LinkSourceResult<Knowledge> {
    let pool = &deps.db_pool;
    let source = LinkSource::find_for_organization(link_source_id, organization_id, pool)
        .await?
        .ok_or(LinkSourceError::NotFound)?;

    // A running crawl replaces every page of the source when it finishes.
    if source.status.is_in_flight() {
        return Err(LinkSourceError::AlreadyCrawling);
    }
    if source.ignores(url) {
        return Err(LinkSourceError::InvalidInput(format!(
            "{} is ignored for this link source",
            url
        )));
    }
    let provider = deps
        .crawl_provider
        .as_ref()
        .ok_or(LinkSourceError::ProviderNotConfigured)?;

    let page = provider.scrape_page(url).await?;

    let existing = Knowledge::find_active_by_url(link_source_id, url, pool).await?;
    let old_size = existing.as_ref().map(|k| k.size_bytes).unwrap_or(0);

    let features = deps.plans.features_for(organization_id).await?;
    let quota = QuotaSnapshot::from_features(&features);
    let usage = LinkSource::usage_for_organization(organization_id, None, pool).await?;

    let bytes_after = (usage.bytes - old_size + page.size_bytes).max(0) as u64;
    if !quota.size_limit_bytes.allows(bytes_after) {
        return Err(LinkSourceError::QuotaExceeded {
            resource: "storage bytes",
            limit: quota.size_limit_bytes,
        });
    }
    if existing.is_none() && !quota.total_pages_limit.allows(usage.pages.max(0) as u64 + 1) {
        return Err(LinkSourceError::QuotaExceeded {
            resource: "pages",
            limit: quota.total_pages_limit,
        });
    }

    let knowledge = Knowledge::upsert_for_crawl(&source, &page, KnowledgeOrigin::Reindex, pool).await?;
    let pages_delta = if existing.is_some() { 0 } else { 1 };
    let updated = LinkSource::adjust_counters(
        link_source_id,
        pages_delta,
        knowledge.size_bytes - old_size,
        pool,
    )
    .await?
    .ok_or(LinkSourceError::NotFound)?;

    info!(
        link_source_id = %link_source_id,
        knowledge_id = %knowledge.id,
        url = %url,
        size_bytes = knowledge.size_bytes,
        "Page reindexed"
    );

    deps.realtime
        .emit(
            &EventScope::from(&updated),
            RealtimeEvent::CrawlPageCompleted {
                link_source_id,
                knowledge_id: knowledge.id,
                url: knowledge.source_url.clone(),
                title: knowledge.source_title.clone(),
                size_bytes: knowledge.size_bytes,
            },
        )
        .await;
    emit_updated(&updated, deps).await;

    Ok(knowledge)
}
