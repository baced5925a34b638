//! Row builders shared by the integration tests.

use std::sync::Arc;

use ingest_core::common::{JobId, OrganizationId, WebsiteId};
use ingest_core::domains::crawling::CrawlLinkSourceJob;
use ingest_core::domains::link_sources::models::{Knowledge, KnowledgeOrigin, LinkSource, NewLinkSource};
use ingest_core::kernel::jobs::{JobContext, JobLease, JobQueue};
use ingest_core::kernel::test_dependencies::mock_page;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// A tenant with one website.
#[derive(Debug, Clone, Copy)]
pub struct Tenant {
    pub organization_id: OrganizationId,
    pub website_id: WebsiteId,
}

impl Tenant {
    pub fn new() -> Self {
        Self {
            organization_id: OrganizationId::new(),
            website_id: WebsiteId::new(),
        }
    }
}

/// Insert a pending source directly, bypassing quota and queueing.
pub async fn insert_source(pool: &PgPool, tenant: Tenant, url: &str) -> LinkSource {
    let input = NewLinkSource::builder()
        .organization_id(tenant.organization_id)
        .website_id(tenant.website_id)
        .url(url)
        .build();
    LinkSource::create(&input, pool)
        .await
        .expect("insert link source")
}

/// Insert a source that already finished a crawl with the given counters.
pub async fn insert_completed_source(
    pool: &PgPool,
    tenant: Tenant,
    url: &str,
    pages: i32,
    bytes: i64,
) -> LinkSource {
    let source = insert_source(pool, tenant, url).await;
    LinkSource::mark_completed(source.id, pages, bytes, pool)
        .await
        .expect("mark completed")
        .expect("source exists")
}

/// Store a crawled page for a source.
pub async fn insert_page(pool: &PgPool, source: &LinkSource, url: &str, size: usize) -> Knowledge {
    Knowledge::upsert_for_crawl(source, &mock_page(url, size), KnowledgeOrigin::Crawl, pool)
        .await
        .expect("insert knowledge")
}

pub fn crawl_job(source: &LinkSource, crawl_limit: u64) -> CrawlLinkSourceJob {
    CrawlLinkSourceJob::for_source(source, crawl_limit)
}

/// Context for running a handler outside the worker loop.
pub fn job_context(queue: Arc<dyn JobQueue>) -> JobContext {
    JobContext::new(
        JobLease::new(JobId::new(), "test-worker", 1),
        queue,
        CancellationToken::new(),
    )
}
