//! Link-source actions: registration, crawl control, page management and queries.

mod common;

use std::sync::Arc;

use common::*;
use ingest_core::common::{OrganizationId, PaginationArgs};
use ingest_core::domains::link_sources::actions::{
    cancel_crawl, create_link_source, delete_link_source, get_domain_tree, get_link_source,
    ignore_url, list_link_sources, recrawl_link_source, reindex_page, scan_subpages,
    set_knowledge_included, update_link_source, CreateLinkSourceInput, CANCELLED_MESSAGE,
    ENQUEUE_FAILED_MESSAGE,
};
use ingest_core::domains::link_sources::models::{
    Knowledge, KnowledgeOrigin, LinkSource, LinkSourceFilter, LinkSourcePatch, LinkSourceStatus,
};
use ingest_core::domains::link_sources::LinkSourceError;
use ingest_core::domains::quota::{FeatureValue, PlanFeatures};
use ingest_core::kernel::jobs::{Job, JobStatus};
use ingest_core::kernel::test_dependencies::mock_page;
use ingest_core::kernel::{FailingJobQueue, MockCrawlProvider, TestDependencies};
use test_context::test_context;

const JOB_TYPE: &str = "crawl_link_source";

async fn queued_job(ctx: &TestHarness, source: &LinkSource) -> Option<Job> {
    Job::find_by_reference(source.id.into_uuid(), JOB_TYPE, &ctx.db_pool)
        .await
        .unwrap()
}

async fn put_in_flight(ctx: &TestHarness, source: &LinkSource, provider_job: &str) {
    LinkSource::mark_crawling(source.id, &ctx.db_pool).await.unwrap();
    LinkSource::set_firecrawl_job_id(source.id, provider_job, &ctx.db_pool)
        .await
        .unwrap();
}

#[test_context(TestHarness)]
#[tokio::test]
async fn create_registers_a_pending_source_and_queues_its_crawl(ctx: &TestHarness) {
    let test_deps = TestDependencies::new();
    let nats = test_deps.nats.clone();
    let deps = ctx.deps(test_deps);
    let tenant = Tenant::new();

    let source = create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "  https://example.com/docs  "),
        &deps,
    )
    .await
    .unwrap();

    assert_eq!(source.status, LinkSourceStatus::Pending);
    assert_eq!(source.url, "https://example.com/docs");
    assert_eq!(source.depth, 0);

    let job = queued_job(ctx, &source).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.args["crawlLimit"], 10_000);
    assert_eq!(job.args["url"], "https://example.com/docs");

    assert_eq!(nats.event_types(), vec!["linkSourceUpdated".to_string()]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn crawl_limit_accounts_for_pages_already_used(ctx: &TestHarness) {
    let plan = PlanFeatures {
        pages_per_crawl: FeatureValue::Limit(25),
        total_pages: FeatureValue::Limit(100),
        ..Default::default()
    };
    let deps = ctx.deps(TestDependencies::new().with_plan(plan));
    let tenant = Tenant::new();
    insert_completed_source(&ctx.db_pool, tenant, "https://old.example.com", 90, 9_000).await;

    let source = create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "https://example.com"),
        &deps,
    )
    .await
    .unwrap();

    let job = queued_job(ctx, &source).await.unwrap();
    assert_eq!(job.args["crawlLimit"], 10);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn duplicate_url_conflicts_until_the_first_is_deleted(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    let input = CreateLinkSourceInput::new(tenant.website_id, "https://example.com");

    let first = create_link_source(tenant.organization_id, input.clone(), &deps)
        .await
        .unwrap();

    let err = create_link_source(tenant.organization_id, input.clone(), &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkSourceError::Conflict));

    delete_link_source(first.id, tenant.organization_id, &deps)
        .await
        .unwrap();

    let second = create_link_source(tenant.organization_id, input, &deps)
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn link_source_quota_is_enforced(ctx: &TestHarness) {
    let plan = PlanFeatures {
        link_sources: FeatureValue::Limit(1),
        ..Default::default()
    };
    let deps = ctx.deps(TestDependencies::new().with_plan(plan));
    let tenant = Tenant::new();

    create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "https://a.example.com"),
        &deps,
    )
    .await
    .unwrap();

    let err = create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "https://b.example.com"),
        &deps,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        LinkSourceError::QuotaExceeded {
            resource: "link sources",
            ..
        }
    ));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn disabled_feature_blocks_creation(ctx: &TestHarness) {
    let plan = PlanFeatures {
        link_sources: FeatureValue::Disabled,
        ..Default::default()
    };
    let deps = ctx.deps(TestDependencies::new().with_plan(plan));
    let tenant = Tenant::new();

    let err = create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "https://example.com"),
        &deps,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LinkSourceError::QuotaExceeded { .. }));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn invalid_url_is_rejected(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();

    let err = create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "not a url"),
        &deps,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LinkSourceError::InvalidInput(_)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn enqueue_failure_leaves_a_failed_source_and_no_job(ctx: &TestHarness) {
    let queue = Arc::new(FailingJobQueue::new());
    let deps = ctx.deps(TestDependencies::new().with_job_queue(queue.clone()));
    let tenant = Tenant::new();

    let source = create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "https://example.com"),
        &deps,
    )
    .await
    .unwrap();

    assert_eq!(source.status, LinkSourceStatus::Failed);
    assert_eq!(source.error_message.as_deref(), Some(ENQUEUE_FAILED_MESSAGE));
    assert_eq!(queue.enqueue_attempts(), 1);
    assert!(queued_job(ctx, &source).await.is_none());

    let stored = get_link_source(source.id, tenant.organization_id, &deps)
        .await
        .unwrap();
    assert_eq!(stored.status, LinkSourceStatus::Failed);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn other_organizations_see_not_found(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let source = insert_source(&ctx.db_pool, Tenant::new(), "https://example.com").await;
    let stranger = OrganizationId::new();

    assert!(matches!(
        get_link_source(source.id, stranger, &deps).await,
        Err(LinkSourceError::NotFound)
    ));
    assert!(matches!(
        delete_link_source(source.id, stranger, &deps).await,
        Err(LinkSourceError::NotFound)
    ));
    assert!(matches!(
        recrawl_link_source(source.id, stranger, &deps).await,
        Err(LinkSourceError::NotFound)
    ));
    assert!(LinkSource::find_by_id(source.id, &ctx.db_pool)
        .await
        .unwrap()
        .is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn deleting_an_in_flight_source_stops_its_crawl(ctx: &TestHarness) {
    let test_deps = TestDependencies::new();
    let provider = test_deps.crawl_provider.clone();
    let deps = ctx.deps(test_deps);
    let tenant = Tenant::new();

    let source = create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "https://example.com"),
        &deps,
    )
    .await
    .unwrap();
    put_in_flight(ctx, &source, "fc-1").await;
    insert_page(&ctx.db_pool, &source, "https://example.com/a", 10).await;

    let deleted = delete_link_source(source.id, tenant.organization_id, &deps)
        .await
        .unwrap();

    assert!(deleted.deleted_at.is_some());
    assert_eq!(provider.cancel_calls(), vec!["fc-1".to_string()]);
    assert_eq!(queued_job(ctx, &source).await.unwrap().status, JobStatus::Cancelled);
    assert!(Knowledge::find_active_for_link_source(source.id, &ctx.db_pool)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        get_link_source(source.id, tenant.organization_id, &deps).await,
        Err(LinkSourceError::NotFound)
    ));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn delete_succeeds_when_cancellation_fails(ctx: &TestHarness) {
    let queue = Arc::new(FailingJobQueue::new());
    let deps = ctx.deps(
        TestDependencies::new()
            .with_job_queue(queue.clone())
            .with_crawl_provider(MockCrawlProvider::new().with_failing_cancel()),
    );
    let tenant = Tenant::new();
    let source = insert_source(&ctx.db_pool, tenant, "https://example.com").await;
    put_in_flight(ctx, &source, "fc-1").await;

    let deleted = delete_link_source(source.id, tenant.organization_id, &deps)
        .await
        .unwrap();

    assert!(deleted.deleted_at.is_some());
    assert_eq!(queue.cancel_attempts(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cancel_marks_an_in_flight_source_failed(ctx: &TestHarness) {
    let test_deps = TestDependencies::new();
    let provider = test_deps.crawl_provider.clone();
    let deps = ctx.deps(test_deps);
    let tenant = Tenant::new();

    let source = create_link_source(
        tenant.organization_id,
        CreateLinkSourceInput::new(tenant.website_id, "https://example.com"),
        &deps,
    )
    .await
    .unwrap();

    let cancelled = cancel_crawl(source.id, tenant.organization_id, &deps)
        .await
        .unwrap();
    assert_eq!(cancelled.status, LinkSourceStatus::Failed);
    assert_eq!(cancelled.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    assert_eq!(queued_job(ctx, &source).await.unwrap().status, JobStatus::Cancelled);
    // No provider job was started yet.
    assert!(provider.cancel_calls().is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cancel_leaves_finished_sources_alone(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    let source = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 3, 30).await;

    let after = cancel_crawl(source.id, tenant.organization_id, &deps)
        .await
        .unwrap();
    assert_eq!(after.status, LinkSourceStatus::Completed);
    assert_eq!(after.updated_at, source.updated_at);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn recrawl_refuses_sources_already_in_flight(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    let source = insert_source(&ctx.db_pool, tenant, "https://example.com").await;

    let err = recrawl_link_source(source.id, tenant.organization_id, &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkSourceError::AlreadyCrawling));

    put_in_flight(ctx, &source, "fc-1").await;
    let err = recrawl_link_source(source.id, tenant.organization_id, &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkSourceError::AlreadyCrawling));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn recrawl_resets_the_source_and_excludes_its_own_pages(ctx: &TestHarness) {
    let plan = PlanFeatures {
        total_pages: FeatureValue::Limit(100),
        ..Default::default()
    };
    let deps = ctx.deps(TestDependencies::new().with_plan(plan));
    let tenant = Tenant::new();

    insert_completed_source(&ctx.db_pool, tenant, "https://other.example.com", 30, 300).await;
    let source = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 60, 600).await;
    let source = LinkSource::mark_failed(source.id, "Site blocked", &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();

    let reset = recrawl_link_source(source.id, tenant.organization_id, &deps)
        .await
        .unwrap();

    assert_eq!(reset.status, LinkSourceStatus::Pending);
    assert_eq!(reset.error_message, None);
    assert_eq!(reset.firecrawl_job_id, None);

    let job = queued_job(ctx, &source).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.args["crawlLimit"], 70);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn ignoring_a_url_removes_the_page_once(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    let source = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 2, 300).await;
    insert_page(&ctx.db_pool, &source, "https://example.com/keep", 200).await;
    insert_page(&ctx.db_pool, &source, "https://example.com/drop", 100).await;

    let updated = ignore_url(source.id, tenant.organization_id, "https://example.com/drop", &deps)
        .await
        .unwrap();
    assert_eq!(updated.ignored_urls, vec!["https://example.com/drop".to_string()]);
    assert_eq!(updated.crawled_pages_count, 1);
    assert_eq!(updated.total_size_bytes, 200);

    let again = ignore_url(source.id, tenant.organization_id, "https://example.com/drop", &deps)
        .await
        .unwrap();
    assert_eq!(again.ignored_urls.len(), 1);
    assert_eq!(again.crawled_pages_count, 1);
    assert_eq!(again.total_size_bytes, 200);

    let active = Knowledge::find_active_for_link_source(source.id, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].source_url, "https://example.com/keep");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn knowledge_inclusion_is_scoped_to_the_organization(ctx: &TestHarness) {
    let test_deps = TestDependencies::new();
    let nats = test_deps.nats.clone();
    let deps = ctx.deps(test_deps);
    let tenant = Tenant::new();
    let source = insert_source(&ctx.db_pool, tenant, "https://example.com").await;
    let page = insert_page(&ctx.db_pool, &source, "https://example.com/a", 10).await;
    assert!(page.is_included);

    let excluded = set_knowledge_included(page.id, tenant.organization_id, false, &deps)
        .await
        .unwrap();
    assert!(!excluded.is_included);
    assert_eq!(nats.event_types(), vec!["linkSourceUpdated".to_string()]);
    let updated = &nats.json_payloads()[0];
    assert_eq!(updated["linkSource"]["id"], serde_json::json!(source.id));

    assert!(matches!(
        set_knowledge_included(page.id, OrganizationId::new(), true, &deps).await,
        Err(LinkSourceError::NotFound)
    ));
    assert_eq!(nats.publish_count(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reindex_replaces_a_stored_page(ctx: &TestHarness) {
    let provider = MockCrawlProvider::new().with_scrape(mock_page("ignored", 50));
    let test_deps = TestDependencies::new().with_crawl_provider(provider);
    let nats = test_deps.nats.clone();
    let deps = ctx.deps(test_deps);
    let tenant = Tenant::new();

    let source = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 1, 10).await;
    let old = insert_page(&ctx.db_pool, &source, "https://example.com/a", 10).await;

    let page = reindex_page(source.id, tenant.organization_id, "https://example.com/a", &deps)
        .await
        .unwrap();

    assert_eq!(page.origin, KnowledgeOrigin::Reindex);
    assert_eq!(page.size_bytes, 50);
    assert_eq!(page.id, old.id);

    let source = get_link_source(source.id, tenant.organization_id, &deps)
        .await
        .unwrap();
    assert_eq!(source.crawled_pages_count, 1);
    assert_eq!(source.total_size_bytes, 50);
    assert_eq!(
        nats.event_types(),
        vec!["crawlPageCompleted".to_string(), "linkSourceUpdated".to_string()]
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reindex_adds_a_new_page(ctx: &TestHarness) {
    let provider = MockCrawlProvider::new().with_scrape(mock_page("ignored", 40));
    let deps = ctx.deps(TestDependencies::new().with_crawl_provider(provider));
    let tenant = Tenant::new();
    let source = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 1, 10).await;

    reindex_page(source.id, tenant.organization_id, "https://example.com/new", &deps)
        .await
        .unwrap();

    let source = get_link_source(source.id, tenant.organization_id, &deps)
        .await
        .unwrap();
    assert_eq!(source.crawled_pages_count, 2);
    assert_eq!(source.total_size_bytes, 50);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reindex_is_refused_while_crawling(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    let source = insert_source(&ctx.db_pool, tenant, "https://example.com").await;

    let err = reindex_page(source.id, tenant.organization_id, "https://example.com/a", &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkSourceError::AlreadyCrawling));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reindex_needs_a_provider(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new().without_crawl_provider());
    let tenant = Tenant::new();
    let source = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 0, 0).await;

    let err = reindex_page(source.id, tenant.organization_id, "https://example.com/a", &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkSourceError::ProviderNotConfigured));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reindex_respects_the_byte_quota(ctx: &TestHarness) {
    let provider = MockCrawlProvider::new().with_scrape(mock_page("ignored", 200));
    let plan = PlanFeatures {
        size_limit_bytes: FeatureValue::Limit(100),
        ..Default::default()
    };
    let deps = ctx.deps(
        TestDependencies::new()
            .with_crawl_provider(provider)
            .with_plan(plan),
    );
    let tenant = Tenant::new();
    let source = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 1, 10).await;
    insert_page(&ctx.db_pool, &source, "https://example.com/a", 10).await;

    let err = reindex_page(source.id, tenant.organization_id, "https://example.com/a", &deps)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LinkSourceError::QuotaExceeded {
            resource: "storage bytes",
            ..
        }
    ));

    let stored = Knowledge::find_active_for_link_source(source.id, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(stored[0].size_bytes, 10);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn listing_pages_through_sources_newest_first(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    let mut created = Vec::new();
    for host in ["a", "b", "c"] {
        created.push(insert_source(&ctx.db_pool, tenant, &format!("https://{}.example.com", host)).await);
    }
    insert_source(&ctx.db_pool, Tenant::new(), "https://elsewhere.example.com").await;

    let first_page = list_link_sources(
        tenant.organization_id,
        &LinkSourceFilter::default(),
        &PaginationArgs {
            first: Some(2),
            after: None,
        },
        &deps,
    )
    .await
    .unwrap();

    assert_eq!(first_page.items.len(), 2);
    assert!(first_page.has_next_page);
    assert_eq!(first_page.items[0].id, created[2].id);
    assert_eq!(first_page.items[1].id, created[1].id);

    let second_page = list_link_sources(
        tenant.organization_id,
        &LinkSourceFilter::default(),
        &PaginationArgs {
            first: Some(2),
            after: first_page.end_cursor.clone(),
        },
        &deps,
    )
    .await
    .unwrap();

    assert_eq!(second_page.items.len(), 1);
    assert!(!second_page.has_next_page);
    assert_eq!(second_page.items[0].id, created[0].id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn listing_filters_by_status(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    insert_source(&ctx.db_pool, tenant, "https://a.example.com").await;
    let done = insert_completed_source(&ctx.db_pool, tenant, "https://b.example.com", 1, 1).await;

    let filter = LinkSourceFilter {
        status: Some(LinkSourceStatus::Completed),
        ..Default::default()
    };
    let page = list_link_sources(tenant.organization_id, &filter, &PaginationArgs::default(), &deps)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, done.id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn domain_tree_merges_sources_with_the_first_source_winning(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();

    let first = insert_source(&ctx.db_pool, tenant, "https://example.com").await;
    let second = insert_source(&ctx.db_pool, tenant, "https://example.com/docs").await;

    insert_page(&ctx.db_pool, &first, "https://example.com/", 10).await;
    let docs = insert_page(&ctx.db_pool, &first, "https://example.com/docs", 20).await;
    insert_page(&ctx.db_pool, &second, "https://example.com/docs/", 30).await;
    let api = insert_page(&ctx.db_pool, &second, "https://example.com/docs/api", 40).await;

    let tree = get_domain_tree(tenant.organization_id, tenant.website_id, &deps)
        .await
        .unwrap();

    assert_eq!(tree.len(), 1);
    let root = &tree[0];
    assert_eq!(root.path, "/");
    assert_eq!(root.children.len(), 1);

    let docs_node = &root.children[0];
    assert_eq!(docs_node.path, "/docs");
    assert_eq!(docs_node.knowledge_id, docs.id);
    assert_eq!(docs_node.link_source_id, first.id);

    assert_eq!(docs_node.children.len(), 1);
    assert_eq!(docs_node.children[0].knowledge_id, api.id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn domain_tree_of_an_unknown_website_is_empty(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();

    let tree = get_domain_tree(tenant.organization_id, tenant.website_id, &deps)
        .await
        .unwrap();
    assert!(tree.is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn scan_subpages_creates_a_scoped_child(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    let parent = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 1, 1).await;
    let parent = update_link_source(
        parent.id,
        tenant.organization_id,
        LinkSourcePatch {
            exclude_paths: Some(vec!["/private/.*".to_string()]),
            max_depth: Some(2),
            ..Default::default()
        },
        &deps,
    )
    .await
    .unwrap();

    let child = scan_subpages(
        parent.id,
        tenant.organization_id,
        "https://example.com/docs/",
        None,
        &deps,
    )
    .await
    .unwrap();

    assert_eq!(child.parent_link_source_id, Some(parent.id));
    assert_eq!(child.depth, 1);
    assert_eq!(child.include_paths, vec!["/docs(/.*)?$".to_string()]);
    assert_eq!(child.exclude_paths, vec!["/private/.*".to_string()]);
    assert_eq!(child.max_depth, Some(2));
    assert_eq!(child.status, LinkSourceStatus::Pending);

    let job = queued_job(ctx, &child).await.unwrap();
    assert_eq!(job.args["includePaths"][0], "/docs(/.*)?$");
    assert_eq!(job.args["maxDepth"], 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn scan_subpages_rejects_other_hosts(ctx: &TestHarness) {
    let deps = ctx.deps(TestDependencies::new());
    let tenant = Tenant::new();
    let parent = insert_completed_source(&ctx.db_pool, tenant, "https://example.com", 1, 1).await;

    let err = scan_subpages(
        parent.id,
        tenant.organization_id,
        "https://other.org/docs",
        None,
        &deps,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LinkSourceError::InvalidInput(_)));
}
