// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The crawl orchestration in domains/crawling talks to the outside world
// exclusively through these seams so tests can swap in mocks.
//
// Naming convention: Base* for trait names (e.g., BaseCrawlProvider)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::OrganizationId;
use crate::domains::quota::PlanFeatures;

// =============================================================================
// Crawl Provider (third-party batch crawl API)
// =============================================================================

/// Options forwarded to the provider when a crawl starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlOptions {
    pub limit: u64,
    pub max_depth: u32,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
}

/// Provider answer to a start-crawl request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStart {
    pub success: bool,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

impl CrawlStart {
    pub fn started(job_id: impl Into<String>) -> Self {
        Self {
            success: true,
            job_id: Some(job_id.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            job_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCrawlState {
    Mapping,
    Crawling,
    Completed,
    Failed,
}

impl ProviderCrawlState {
    /// Still running on the provider side.
    pub fn is_active(&self) -> bool {
        matches!(self, ProviderCrawlState::Mapping | ProviderCrawlState::Crawling)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProgress {
    pub completed: u64,
    pub total: u64,
}

/// One crawled page as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPage {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub markdown: String,
    pub size_bytes: i64,
}

impl ProviderPage {
    /// Build a page whose size is the UTF-8 length of its markdown.
    pub fn from_markdown(url: impl Into<String>, title: Option<String>, markdown: String) -> Self {
        let size_bytes = markdown.len() as i64;
        Self {
            url: url.into(),
            title,
            description: None,
            markdown,
            size_bytes,
        }
    }
}

/// Snapshot of a provider crawl. `pages` may be partial while the crawl is
/// active and only becomes authoritative at a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStatusReport {
    pub status: ProviderCrawlState,
    pub progress: ProviderProgress,
    pub pages: Vec<ProviderPage>,
    pub error: Option<String>,
}

#[async_trait]
pub trait BaseCrawlProvider: Send + Sync {
    /// Start an asynchronous crawl.
    async fn start_crawl(&self, url: &str, options: &CrawlOptions) -> Result<CrawlStart>;

    /// Fetch the current status (and pages so far) of a crawl.
    async fn get_crawl_status(&self, job_id: &str) -> Result<CrawlStatusReport>;

    /// Ask the provider to stop a crawl.
    async fn cancel_crawl(&self, job_id: &str) -> Result<()>;

    /// Scrape a single page synchronously (used by page reindex).
    async fn scrape_page(&self, url: &str) -> Result<ProviderPage>;
}

// =============================================================================
// Plan / quota source
// =============================================================================

#[async_trait]
pub trait BasePlanProvider: Send + Sync {
    /// Raw plan feature flags for an organization.
    async fn features_for(&self, organization_id: OrganizationId) -> Result<PlanFeatures>;
}
