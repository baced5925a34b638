use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use typed_builder::TypedBuilder;

use crate::common::{
    AiAgentId, LinkSourceId, OrganizationId, UserId, ValidatedPagination, WebsiteId,
};

/// Crawl status of a link source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "link_source_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LinkSourceStatus {
    Pending,
    Mapping,
    Crawling,
    Completed,
    Failed,
}

impl LinkSourceStatus {
    /// A crawl attempt has finished; jobs for this source are no-ops.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkSourceStatus::Completed | LinkSourceStatus::Failed)
    }

    /// Waiting for or running a crawl.
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for LinkSourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSourceStatus::Pending => write!(f, "pending"),
            LinkSourceStatus::Mapping => write!(f, "mapping"),
            LinkSourceStatus::Crawling => write!(f, "crawling"),
            LinkSourceStatus::Completed => write!(f, "completed"),
            LinkSourceStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for LinkSourceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LinkSourceStatus::Pending),
            "mapping" => Ok(LinkSourceStatus::Mapping),
            "crawling" => Ok(LinkSourceStatus::Crawling),
            "completed" => Ok(LinkSourceStatus::Completed),
            "failed" => Ok(LinkSourceStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid link source status: {}", s)),
        }
    }
}

/// LinkSource - a crawl target and its aggregate state
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LinkSource {
    pub id: LinkSourceId,
    pub organization_id: OrganizationId,
    pub website_id: WebsiteId,
    pub ai_agent_id: Option<AiAgentId>,
    pub parent_link_source_id: Option<LinkSourceId>,

    // Crawl configuration
    pub url: String,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub ignored_urls: Vec<String>,
    pub max_depth: Option<i32>,

    // Runtime state
    pub status: LinkSourceStatus,
    pub firecrawl_job_id: Option<String>,
    pub error_message: Option<String>,

    // Aggregates
    pub depth: i32,
    pub discovered_pages_count: i32,
    pub crawled_pages_count: i32,
    pub total_size_bytes: i64,

    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for inserting a link source
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewLinkSource {
    pub organization_id: OrganizationId,
    pub website_id: WebsiteId,
    pub url: String,
    #[builder(default)]
    pub ai_agent_id: Option<AiAgentId>,
    #[builder(default)]
    pub parent_link_source_id: Option<LinkSourceId>,
    #[builder(default)]
    pub include_paths: Vec<String>,
    #[builder(default)]
    pub exclude_paths: Vec<String>,
    #[builder(default)]
    pub max_depth: Option<i32>,
    #[builder(default = 0)]
    pub depth: i32,
    #[builder(default)]
    pub created_by: Option<UserId>,
}

/// Partial update; `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct LinkSourcePatch {
    pub status: Option<LinkSourceStatus>,
    pub include_paths: Option<Vec<String>>,
    pub exclude_paths: Option<Vec<String>>,
    pub max_depth: Option<i32>,
    pub discovered_pages_count: Option<i32>,
    pub crawled_pages_count: Option<i32>,
    pub total_size_bytes: Option<i64>,
}

/// Listing filter
#[derive(Debug, Clone, Default)]
pub struct LinkSourceFilter {
    pub website_id: Option<WebsiteId>,
    pub ai_agent_id: Option<AiAgentId>,
    pub status: Option<LinkSourceStatus>,
}

/// Page and byte usage across an organization's live sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct OrganizationUsage {
    pub pages: i64,
    pub bytes: i64,
}

impl LinkSource {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether a page URL was excluded by the user.
    pub fn ignores(&self, url: &str) -> bool {
        self.ignored_urls.iter().any(|u| u == url)
    }

    pub async fn create(input: &NewLinkSource, pool: &PgPool) -> Result<Self> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO link_sources (
                id, organization_id, website_id, ai_agent_id, parent_link_source_id,
                url, include_paths, exclude_paths, max_depth, depth, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(LinkSourceId::new())
        .bind(input.organization_id)
        .bind(input.website_id)
        .bind(input.ai_agent_id)
        .bind(input.parent_link_source_id)
        .bind(&input.url)
        .bind(&input.include_paths)
        .bind(&input.exclude_paths)
        .bind(input.max_depth)
        .bind(input.depth)
        .bind(input.created_by)
        .fetch_one(pool)
        .await?;

        Ok(source)
    }

    /// Find a live (not soft-deleted) source by id
    pub async fn find_by_id(id: LinkSourceId, pool: &PgPool) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            "SELECT * FROM link_sources WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Find a live source owned by the organization
    pub async fn find_for_organization(
        id: LinkSourceId,
        organization_id: OrganizationId,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM link_sources
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Find by id including soft-deleted rows
    pub async fn find_any(id: LinkSourceId, pool: &PgPool) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>("SELECT * FROM link_sources WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(source)
    }

    /// Uniqueness check for (website, agent, url)
    pub async fn find_by_url(
        website_id: WebsiteId,
        ai_agent_id: Option<AiAgentId>,
        url: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM link_sources
            WHERE website_id = $1
              AND ai_agent_id IS NOT DISTINCT FROM $2
              AND url = $3
              AND deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(website_id)
        .bind(ai_agent_id)
        .bind(url)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Lock a live source row for the rest of the transaction
    pub async fn lock_for_update<'e>(
        id: LinkSourceId,
        organization_id: OrganizationId,
        executor: impl PgExecutor<'e>,
    ) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM link_sources
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(executor)
        .await?;

        Ok(source)
    }

    pub async fn update(id: LinkSourceId, patch: &LinkSourcePatch, pool: &PgPool) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET status = COALESCE($2, status),
                include_paths = COALESCE($3, include_paths),
                exclude_paths = COALESCE($4, exclude_paths),
                max_depth = COALESCE($5, max_depth),
                discovered_pages_count = COALESCE($6, discovered_pages_count),
                crawled_pages_count = COALESCE($7, crawled_pages_count),
                total_size_bytes = COALESCE($8, total_size_bytes),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(patch.status)
        .bind(&patch.include_paths)
        .bind(&patch.exclude_paths)
        .bind(patch.max_depth)
        .bind(patch.discovered_pages_count)
        .bind(patch.crawled_pages_count)
        .bind(patch.total_size_bytes)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Start of a crawl attempt
    pub async fn mark_crawling(id: LinkSourceId, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE link_sources
            SET status = 'crawling',
                error_message = NULL,
                discovered_pages_count = 0,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_firecrawl_job_id(id: LinkSourceId, job_id: &str, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE link_sources
            SET firecrawl_job_id = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(job_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Returns false once the source no longer belongs to this provider job.
    pub async fn set_discovered_count(
        id: LinkSourceId,
        firecrawl_job_id: &str,
        count: i32,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE link_sources
            SET discovered_pages_count = $3, updated_at = NOW()
            WHERE id = $1
              AND firecrawl_job_id = $2
              AND status = 'crawling'
              AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(firecrawl_job_id)
        .bind(count)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Successful end of a crawl attempt. Returns false if the source is gone.
    pub async fn mark_completed(
        id: LinkSourceId,
        crawled_pages_count: i32,
        total_size_bytes: i64,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET status = 'completed',
                crawled_pages_count = $2,
                total_size_bytes = $3,
                last_crawled_at = NOW(),
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(crawled_pages_count)
        .bind(total_size_bytes)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Finish the crawl driven by `firecrawl_job_id`. `None` when the source was
    /// deleted, finished or handed to another provider job meanwhile.
    pub async fn complete_crawl(
        id: LinkSourceId,
        firecrawl_job_id: &str,
        crawled_pages_count: i32,
        total_size_bytes: i64,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET status = 'completed',
                crawled_pages_count = $3,
                total_size_bytes = $4,
                last_crawled_at = NOW(),
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND firecrawl_job_id = $2
              AND status = 'crawling'
              AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(firecrawl_job_id)
        .bind(crawled_pages_count)
        .bind(total_size_bytes)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Fail the crawl driven by `firecrawl_job_id`, with the same guard as
    /// [`LinkSource::complete_crawl`].
    pub async fn fail_crawl(
        id: LinkSourceId,
        firecrawl_job_id: &str,
        error: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET status = 'failed',
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1
              AND firecrawl_job_id = $2
              AND status = 'crawling'
              AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(firecrawl_job_id)
        .bind(error)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    pub async fn mark_failed(id: LinkSourceId, error: &str, pool: &PgPool) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Back to pending for another crawl attempt
    pub async fn reset_for_recrawl<'e>(
        id: LinkSourceId,
        executor: impl PgExecutor<'e>,
    ) -> Result<Self> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET status = 'pending',
                firecrawl_job_id = NULL,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await?;

        Ok(source)
    }

    /// Soft delete the source and its pages together
    pub async fn soft_delete(id: LinkSourceId, pool: &PgPool) -> Result<Option<Self>> {
        let mut tx = pool.begin().await?;

        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if source.is_some() {
            sqlx::query(
                r#"
                UPDATE knowledge
                SET deleted_at = NOW(), updated_at = NOW()
                WHERE link_source_id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(source)
    }

    /// Record an ignored URL and drop the page from the counters
    pub async fn add_ignored_url(
        id: LinkSourceId,
        url: &str,
        removed_pages: i32,
        removed_bytes: i64,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET ignored_urls = CASE
                    WHEN $2 = ANY(ignored_urls) THEN ignored_urls
                    ELSE array_append(ignored_urls, $2)
                END,
                crawled_pages_count = GREATEST(crawled_pages_count - $3, 0),
                total_size_bytes = GREATEST(total_size_bytes - $4, 0),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(url)
        .bind(removed_pages)
        .bind(removed_bytes)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Apply page/byte deltas (single-page reindex)
    pub async fn adjust_counters(
        id: LinkSourceId,
        pages_delta: i32,
        bytes_delta: i64,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let source = sqlx::query_as::<_, Self>(
            r#"
            UPDATE link_sources
            SET crawled_pages_count = GREATEST(crawled_pages_count + $2, 0),
                total_size_bytes = GREATEST(total_size_bytes + $3, 0),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(pages_delta)
        .bind(bytes_delta)
        .fetch_optional(pool)
        .await?;

        Ok(source)
    }

    /// Cursor-paginated listing, newest first. Returns `limit + 1` rows at most.
    pub async fn list(
        organization_id: OrganizationId,
        filter: &LinkSourceFilter,
        pagination: &ValidatedPagination,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let sources = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM link_sources
            WHERE organization_id = $1
              AND deleted_at IS NULL
              AND ($2::uuid IS NULL OR website_id = $2)
              AND ($3::uuid IS NULL OR ai_agent_id = $3)
              AND ($4::link_source_status IS NULL OR status = $4)
              AND ($5::uuid IS NULL OR id < $5)
            ORDER BY id DESC
            LIMIT $6
            "#,
        )
        .bind(organization_id)
        .bind(filter.website_id)
        .bind(filter.ai_agent_id)
        .bind(filter.status)
        .bind(pagination.after)
        .bind(pagination.fetch_limit())
        .fetch_all(pool)
        .await?;

        Ok(sources)
    }

    /// All live sources of a website (domain tree input)
    pub async fn find_for_website(
        organization_id: OrganizationId,
        website_id: WebsiteId,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let sources = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM link_sources
            WHERE organization_id = $1 AND website_id = $2 AND deleted_at IS NULL
            ORDER BY created_at, id
            "#,
        )
        .bind(organization_id)
        .bind(website_id)
        .fetch_all(pool)
        .await?;

        Ok(sources)
    }

    pub async fn count_active_for_organization(
        organization_id: OrganizationId,
        pool: &PgPool,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM link_sources WHERE organization_id = $1 AND deleted_at IS NULL",
        )
        .bind(organization_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    /// Pages and bytes held by the organization's live sources, optionally
    /// leaving one source out (the one about to be recrawled).
    pub async fn usage_for_organization<'e>(
        organization_id: OrganizationId,
        excluding: Option<LinkSourceId>,
        executor: impl PgExecutor<'e>,
    ) -> Result<OrganizationUsage> {
        let usage = sqlx::query_as::<_, OrganizationUsage>(
            r#"
            SELECT COALESCE(SUM(crawled_pages_count), 0)::BIGINT AS pages,
                   COALESCE(SUM(total_size_bytes), 0)::BIGINT AS bytes
            FROM link_sources
            WHERE organization_id = $1
              AND deleted_at IS NULL
              AND ($2::uuid IS NULL OR id <> $2)
            "#,
        )
        .bind(organization_id)
        .bind(excluding)
        .fetch_one(executor)
        .await?;

        Ok(usage)
    }

    /// Serialize quota decisions for one organization until the transaction ends
    pub async fn lock_organization<'e>(
        organization_id: OrganizationId,
        executor: impl PgExecutor<'e>,
    ) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(organization_id.to_string())
            .execute(executor)
            .await?;

        Ok(())
    }
}
