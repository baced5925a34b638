//! Firecrawl implementation of [`BaseCrawlProvider`].
//!
//! Crawls are asynchronous on Firecrawl's side: `POST /crawl` returns a job id
//! and `GET /crawl/{id}` reports status plus whatever pages are ready so far.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{
    BaseCrawlProvider, CrawlOptions, CrawlStart, CrawlStatusReport, ProviderCrawlState,
    ProviderPage, ProviderProgress,
};

pub const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1";

// Upper bound on `next` pages followed for one status call.
const MAX_RESULT_PAGES: usize = 50;

// Request/Response types for Firecrawl API

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlRequest<'a> {
    url: &'a str,
    limit: u64,
    max_depth: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exclude_paths: Vec<String>,
    scrape_options: ScrapeOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeOptions {
    formats: Vec<&'static str>,
    only_main_content: bool,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            formats: vec!["markdown"],
            only_main_content: true,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: &'a str,
    #[serde(flatten)]
    options: ScrapeOptions,
}

#[derive(Deserialize)]
struct CrawlStartResponse {
    success: bool,
    id: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct CrawlStatusResponse {
    status: String,
    completed: Option<u64>,
    total: Option<u64>,
    #[serde(default)]
    data: Vec<PageData>,
    next: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    success: bool,
    data: Option<PageData>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct PageData {
    markdown: Option<String>,
    metadata: Option<PageMetadata>,
}

#[derive(Deserialize)]
struct PageMetadata {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "sourceURL")]
    source_url: Option<String>,
    url: Option<String>,
}

impl PageData {
    /// Pages without a URL or any markdown are dropped.
    fn into_page(self, fallback_url: Option<&str>) -> Option<ProviderPage> {
        let markdown = self.markdown.filter(|m| !m.trim().is_empty())?;
        let (title, description, url) = match self.metadata {
            Some(meta) => (meta.title, meta.description, meta.source_url.or(meta.url)),
            None => (None, None, None),
        };
        let url = url.or_else(|| fallback_url.map(str::to_string))?;

        let mut page = ProviderPage::from_markdown(url, title.filter(|t| !t.is_empty()), markdown);
        page.description = description.filter(|d| !d.is_empty());
        Some(page)
    }
}

fn parse_state(status: &str) -> ProviderCrawlState {
    match status {
        "completed" => ProviderCrawlState::Completed,
        "failed" | "cancelled" => ProviderCrawlState::Failed,
        "mapping" | "queued" => ProviderCrawlState::Mapping,
        "scraping" | "crawling" => ProviderCrawlState::Crawling,
        other => {
            warn!(status = other, "unknown Firecrawl crawl status, treating as crawling");
            ProviderCrawlState::Crawling
        }
    }
}

/// Firecrawl API client
pub struct FirecrawlClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FirecrawlClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, FIRECRAWL_API_URL)
    }

    /// Point the client at another deployment (self-hosted Firecrawl, tests).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create Firecrawl HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn send<R: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<R> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .context("Firecrawl request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Firecrawl API error: {} - {}", status, text);
        }

        response
            .json()
            .await
            .context("Failed to decode Firecrawl response")
    }

    async fn fetch_status(&self, url: &str) -> Result<CrawlStatusResponse> {
        self.send(self.client.get(url)).await
    }
}

#[async_trait]
impl BaseCrawlProvider for FirecrawlClient {
    async fn start_crawl(&self, url: &str, options: &CrawlOptions) -> Result<CrawlStart> {
        let request = CrawlRequest {
            url,
            limit: options.limit,
            max_depth: options.max_depth,
            include_paths: options.include_paths.clone(),
            exclude_paths: options.exclude_paths.clone(),
            scrape_options: ScrapeOptions::default(),
        };

        let response: CrawlStartResponse = self
            .send(
                self.client
                    .post(format!("{}/crawl", self.base_url))
                    .json(&request),
            )
            .await?;

        match (response.success, response.id) {
            (true, Some(id)) => Ok(CrawlStart::started(id)),
            (_, _) => Ok(CrawlStart::rejected(
                response
                    .error
                    .unwrap_or_else(|| "Failed to start crawl".to_string()),
            )),
        }
    }

    async fn get_crawl_status(&self, job_id: &str) -> Result<CrawlStatusReport> {
        let first = self
            .fetch_status(&format!("{}/crawl/{}", self.base_url, job_id))
            .await?;

        let status = parse_state(&first.status);
        let progress = ProviderProgress {
            completed: first.completed.unwrap_or(0),
            total: first.total.unwrap_or(0),
        };
        let error = first.error;
        let mut pages: Vec<ProviderPage> =
            first.data.into_iter().filter_map(|d| d.into_page(None)).collect();

        // Large results are split across `next` links; only follow them once final.
        let mut next = first.next.filter(|_| !status.is_active());
        let mut followed = 0;
        while let Some(url) = next.take() {
            if followed >= MAX_RESULT_PAGES {
                warn!(job_id, "stopped following Firecrawl result pages");
                break;
            }
            followed += 1;
            let more = self.fetch_status(&url).await?;
            pages.extend(more.data.into_iter().filter_map(|d| d.into_page(None)));
            next = more.next;
        }

        debug!(
            job_id,
            status = ?status,
            completed = progress.completed,
            total = progress.total,
            pages = pages.len(),
            "Firecrawl crawl status"
        );

        Ok(CrawlStatusReport {
            status,
            progress,
            pages,
            error,
        })
    }

    async fn cancel_crawl(&self, job_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/crawl/{}", self.base_url, job_id))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .context("Firecrawl cancel request failed")?;

        if !response.status().is_success() {
            bail!("Firecrawl cancel failed: {}", response.status());
        }

        Ok(())
    }

    async fn scrape_page(&self, url: &str) -> Result<ProviderPage> {
        let request = ScrapeRequest {
            url,
            options: ScrapeOptions::default(),
        };

        let response: ScrapeResponse = self
            .send(
                self.client
                    .post(format!("{}/scrape", self.base_url))
                    .json(&request),
            )
            .await?;

        if !response.success {
            bail!(
                "Firecrawl scrape failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        response
            .data
            .and_then(|d| d.into_page(Some(url)))
            .ok_or_else(|| anyhow!("No markdown content returned from Firecrawl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> CrawlOptions {
        CrawlOptions {
            limit: 10,
            max_depth: 2,
            include_paths: vec!["/docs/*".to_string()],
            exclude_paths: vec![],
        }
    }

    #[tokio::test]
    async fn start_crawl_sends_camel_case_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .and(header("Authorization", "Bearer key"))
            .and(body_partial_json(json!({
                "url": "https://example.com",
                "limit": 10,
                "maxDepth": 2,
                "includePaths": ["/docs/*"],
                "scrapeOptions": { "formats": ["markdown"], "onlyMainContent": true }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "id": "j1"
            })))
            .mount(&server)
            .await;

        let client = FirecrawlClient::with_base_url("key", server.uri()).unwrap();
        let start = client
            .start_crawl("https://example.com", &options())
            .await
            .unwrap();

        assert_eq!(start, CrawlStart::started("j1"));
    }

    #[tokio::test]
    async fn rejected_start_carries_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "Insufficient credits"
            })))
            .mount(&server)
            .await;

        let client = FirecrawlClient::with_base_url("key", server.uri()).unwrap();
        let start = client
            .start_crawl("https://example.com", &options())
            .await
            .unwrap();

        assert!(!start.success);
        assert_eq!(start.error.as_deref(), Some("Insufficient credits"));
    }

    #[tokio::test]
    async fn http_errors_surface_as_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crawl/j1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = FirecrawlClient::with_base_url("key", server.uri()).unwrap();
        let err = client.get_crawl_status("j1").await.unwrap_err();

        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn status_maps_pages_and_follows_next_when_done() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crawl/j1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "completed": 2,
                "total": 2,
                "data": [
                    { "markdown": "# Home", "metadata": { "title": "Home", "sourceURL": "https://example.com/" } },
                    { "markdown": "   ", "metadata": { "sourceURL": "https://example.com/empty" } }
                ],
                "next": format!("{}/crawl/j1/more", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/crawl/j1/more"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "data": [
                    { "markdown": "# Docs", "metadata": { "sourceURL": "https://example.com/docs" } }
                ]
            })))
            .mount(&server)
            .await;

        let client = FirecrawlClient::with_base_url("key", server.uri()).unwrap();
        let report = client.get_crawl_status("j1").await.unwrap();

        assert_eq!(report.status, ProviderCrawlState::Completed);
        assert_eq!(report.progress, ProviderProgress { completed: 2, total: 2 });
        let urls: Vec<_> = report.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/", "https://example.com/docs"]);
        assert_eq!(report.pages[0].title.as_deref(), Some("Home"));
        assert_eq!(report.pages[0].size_bytes, "# Home".len() as i64);
    }

    #[tokio::test]
    async fn scrape_falls_back_to_requested_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/scrape"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "markdown": "# Pricing" }
            })))
            .mount(&server)
            .await;

        let client = FirecrawlClient::with_base_url("key", server.uri()).unwrap();
        let page = client
            .scrape_page("https://example.com/pricing")
            .await
            .unwrap();

        assert_eq!(page.url, "https://example.com/pricing");
        assert_eq!(page.markdown, "# Pricing");
    }

    #[test]
    fn provider_states() {
        assert_eq!(parse_state("scraping"), ProviderCrawlState::Crawling);
        assert_eq!(parse_state("cancelled"), ProviderCrawlState::Failed);
        assert_eq!(parse_state("completed"), ProviderCrawlState::Completed);
        assert!(parse_state("mapping").is_active());
    }
}
