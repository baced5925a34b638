// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into ServerDeps for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use super::jobs::{
    ClaimedJob, EnqueueRequest, EnqueueResult, FailureKind, Job, JobLease, JobQueue,
    PostgresJobQueue,
};
use super::{
    BaseCrawlProvider, CrawlOptions, CrawlStart, CrawlStatusReport, ProviderCrawlState,
    ProviderPage, ProviderProgress, ServerDeps, TestNats,
};
use crate::config::CrawlSettings;
use crate::domains::quota::{PlanFeatures, StaticPlanProvider};
use crate::domains::realtime::RealtimeDispatcher;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Mock Crawl Provider
// =============================================================================

/// Arguments captured from a start_crawl call
#[derive(Debug, Clone)]
pub struct StartCrawlCall {
    pub url: String,
    pub options: CrawlOptions,
}

/// Holds a status call open until the test releases it.
#[derive(Clone)]
pub struct StatusGate {
    call: usize,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl StatusGate {
    /// Wait until the gated status call has been made.
    pub async fn wait_reached(&self) {
        self.reached.notified().await;
    }

    /// Let the gated status call return.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Page of `size` bytes of markdown.
pub fn mock_page(url: &str, size: usize) -> ProviderPage {
    ProviderPage::from_markdown(url, Some(format!("Page: {}", url)), "x".repeat(size))
}

pub struct MockCrawlProvider {
    start_responses: Mutex<VecDeque<Result<CrawlStart, String>>>,
    // The last queued status repeats once the queue is down to one entry.
    status_responses: Mutex<VecDeque<Result<CrawlStatusReport, String>>>,
    scrape_responses: Mutex<VecDeque<ProviderPage>>,
    start_calls: Mutex<Vec<StartCrawlCall>>,
    status_calls: Mutex<Vec<String>>,
    cancel_calls: Mutex<Vec<String>>,
    scrape_calls: Mutex<Vec<String>>,
    fail_cancel: Mutex<bool>,
    gate: Mutex<Option<StatusGate>>,
}

impl Default for MockCrawlProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCrawlProvider {
    pub fn new() -> Self {
        Self {
            start_responses: Mutex::new(VecDeque::new()),
            status_responses: Mutex::new(VecDeque::new()),
            scrape_responses: Mutex::new(VecDeque::new()),
            start_calls: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
            cancel_calls: Mutex::new(Vec::new()),
            scrape_calls: Mutex::new(Vec::new()),
            fail_cancel: Mutex::new(false),
            gate: Mutex::new(None),
        }
    }

    /// Queue the answer to the next start_crawl call
    pub fn with_start(self, start: CrawlStart) -> Self {
        lock(&self.start_responses).push_back(Ok(start));
        self
    }

    /// Make the next start_crawl call error out (transport failure)
    pub fn with_start_error(self, error: &str) -> Self {
        lock(&self.start_responses).push_back(Err(error.to_string()));
        self
    }

    /// Queue a status report
    pub fn with_status(self, report: CrawlStatusReport) -> Self {
        lock(&self.status_responses).push_back(Ok(report));
        self
    }

    /// Queue a failing status call (transport failure)
    pub fn with_status_error(self, error: &str) -> Self {
        lock(&self.status_responses).push_back(Err(error.to_string()));
        self
    }

    pub fn with_scrape(self, page: ProviderPage) -> Self {
        lock(&self.scrape_responses).push_back(page);
        self
    }

    pub fn with_failing_cancel(self) -> Self {
        *lock(&self.fail_cancel) = true;
        self
    }

    /// Gate the `call`-th status call (1-based).
    pub fn gate_status_call(&self, call: usize) -> StatusGate {
        let gate = StatusGate {
            call,
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *lock(&self.gate) = Some(gate.clone());
        gate
    }

    pub fn crawling(completed: u64, total: u64, pages: Vec<ProviderPage>) -> CrawlStatusReport {
        CrawlStatusReport {
            status: ProviderCrawlState::Crawling,
            progress: ProviderProgress { completed, total },
            pages,
            error: None,
        }
    }

    pub fn completed(pages: Vec<ProviderPage>) -> CrawlStatusReport {
        let n = pages.len() as u64;
        CrawlStatusReport {
            status: ProviderCrawlState::Completed,
            progress: ProviderProgress {
                completed: n,
                total: n,
            },
            pages,
            error: None,
        }
    }

    pub fn failed(error: &str) -> CrawlStatusReport {
        CrawlStatusReport {
            status: ProviderCrawlState::Failed,
            progress: ProviderProgress::default(),
            pages: vec![],
            error: Some(error.to_string()),
        }
    }

    pub fn start_calls(&self) -> Vec<StartCrawlCall> {
        lock(&self.start_calls).clone()
    }

    pub fn status_call_count(&self) -> usize {
        lock(&self.status_calls).len()
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        lock(&self.cancel_calls).clone()
    }

    pub fn scrape_calls(&self) -> Vec<String> {
        lock(&self.scrape_calls).clone()
    }

    /// Total number of calls of any kind
    pub fn call_count(&self) -> usize {
        lock(&self.start_calls).len()
            + lock(&self.status_calls).len()
            + lock(&self.cancel_calls).len()
            + lock(&self.scrape_calls).len()
    }
}

#[async_trait]
impl BaseCrawlProvider for MockCrawlProvider {
    async fn start_crawl(&self, url: &str, options: &CrawlOptions) -> Result<CrawlStart> {
        let call_number = {
            let mut calls = lock(&self.start_calls);
            calls.push(StartCrawlCall {
                url: url.to_string(),
                options: options.clone(),
            });
            calls.len()
        };

        match lock(&self.start_responses).pop_front() {
            Some(Ok(start)) => Ok(start),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(CrawlStart::started(format!("mock-crawl-{}", call_number))),
        }
    }

    async fn get_crawl_status(&self, job_id: &str) -> Result<CrawlStatusReport> {
        let call_number = {
            let mut calls = lock(&self.status_calls);
            calls.push(job_id.to_string());
            calls.len()
        };

        let response = {
            let mut responses = lock(&self.status_responses);
            if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
        };

        let gate = lock(&self.gate).clone().filter(|g| g.call == call_number);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        match response {
            Some(Ok(report)) => Ok(report),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(Self::completed(vec![])),
        }
    }

    async fn cancel_crawl(&self, job_id: &str) -> Result<()> {
        lock(&self.cancel_calls).push(job_id.to_string());
        if *lock(&self.fail_cancel) {
            return Err(anyhow!("provider refused cancel"));
        }
        Ok(())
    }

    async fn scrape_page(&self, url: &str) -> Result<ProviderPage> {
        lock(&self.scrape_calls).push(url.to_string());
        lock(&self.scrape_responses)
            .pop_front()
            .map(|mut page| {
                page.url = url.to_string();
                page
            })
            .ok_or_else(|| anyhow!("no scrape response queued for {}", url))
    }
}

// =============================================================================
// Failing Job Queue
// =============================================================================

/// Queue whose broker is down: every write fails.
#[derive(Default)]
pub struct FailingJobQueue {
    enqueue_attempts: Mutex<usize>,
    cancel_attempts: Mutex<usize>,
}

impl FailingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_attempts(&self) -> usize {
        *lock(&self.enqueue_attempts)
    }

    pub fn cancel_attempts(&self) -> usize {
        *lock(&self.cancel_attempts)
    }
}

#[async_trait]
impl JobQueue for FailingJobQueue {
    async fn enqueue(&self, _request: EnqueueRequest) -> Result<EnqueueResult> {
        *lock(&self.enqueue_attempts) += 1;
        Err(anyhow!("job queue unavailable"))
    }

    async fn cancel_by_reference(&self, _reference_id: Uuid, _job_type: &str) -> Result<bool> {
        *lock(&self.cancel_attempts) += 1;
        Err(anyhow!("job queue unavailable"))
    }

    async fn claim(&self, _worker_id: &str, _limit: i64) -> Result<Vec<ClaimedJob>> {
        Ok(Vec::new())
    }

    async fn heartbeat(&self, _lease: &JobLease) -> Result<()> {
        Ok(())
    }

    async fn report_progress(&self, _lease: &JobLease, _progress: u8) -> Result<()> {
        Ok(())
    }

    async fn mark_succeeded(&self, _lease: &JobLease) -> Result<()> {
        Ok(())
    }

    async fn mark_failed(&self, _lease: &JobLease, _error: &str, _kind: FailureKind) -> Result<()> {
        Ok(())
    }

    async fn find_by_reference(&self, _reference_id: Uuid, _job_type: &str) -> Result<Option<Job>> {
        Ok(None)
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Builder wiring mocks into a [`ServerDeps`].
pub struct TestDependencies {
    pub crawl_provider: Arc<MockCrawlProvider>,
    pub nats: Arc<TestNats>,
    pub job_queue: Option<Arc<dyn JobQueue>>,
    pub plan: PlanFeatures,
    pub crawl_settings: CrawlSettings,
    pub provider_configured: bool,
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            crawl_provider: Arc::new(MockCrawlProvider::new()),
            nats: Arc::new(TestNats::new()),
            job_queue: None,
            plan: PlanFeatures::default(),
            crawl_settings: CrawlSettings::default()
                .with_poll_interval(Duration::from_millis(10))
                .with_max_poll_attempts(5),
            provider_configured: true,
        }
    }

    pub fn with_crawl_provider(mut self, provider: MockCrawlProvider) -> Self {
        self.crawl_provider = Arc::new(provider);
        self
    }

    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.job_queue = Some(queue);
        self
    }

    pub fn with_plan(mut self, plan: PlanFeatures) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_crawl_settings(mut self, settings: CrawlSettings) -> Self {
        self.crawl_settings = settings;
        self
    }

    pub fn without_crawl_provider(mut self) -> Self {
        self.provider_configured = false;
        self
    }

    pub fn into_server_deps(self, pool: PgPool) -> ServerDeps {
        let crawl_provider: Option<Arc<dyn BaseCrawlProvider>> = if self.provider_configured {
            Some(self.crawl_provider.clone())
        } else {
            None
        };
        let job_queue = self
            .job_queue
            .unwrap_or_else(|| Arc::new(PostgresJobQueue::new(pool.clone())));

        ServerDeps::new(
            pool,
            crawl_provider,
            RealtimeDispatcher::new(self.nats.clone()).with_retry(3, Duration::from_millis(1)),
            job_queue,
            Arc::new(StaticPlanProvider::new(self.plan)),
            self.crawl_settings,
        )
    }
}
