//! Crawl job handler.
//!
//! Drives one link source through a provider crawl:
//!
//! ```text
//! load source ──► terminal? skip
//!     │
//!     ├─► mark crawling ──► start provider crawl ──► emit crawlStarted
//!     │
//!     ├─► poll loop (sleep, source still wanted?, fetch status, emit discoveries)
//!     │
//!     └─► completed: drop old pages, persist new ones within the byte budget,
//!         mark completed, emit crawlCompleted
//! ```
//!
//! Fatal provider problems mark the source failed and are not retried.
//! Database errors bubble up and the queue retries the job; a retried job
//! whose source is still crawling resumes polling the same provider job.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::errors::CrawlError;
use super::jobs::CrawlLinkSourceJob;
use super::progress::{
    persistence_progress, provider_progress, select_pages, SizeBudget, PROGRESS_DONE,
    PROGRESS_PERSISTING, PROGRESS_STARTED,
};
use crate::common::LinkSourceId;
use crate::domains::link_sources::models::{Knowledge, KnowledgeOrigin, LinkSource, LinkSourceStatus};
use crate::domains::quota::QuotaSnapshot;
use crate::domains::realtime::{DiscoveredPage, EventScope, RealtimeEvent};
use crate::kernel::jobs::{ClaimedJob, JobContext, JobFailure, JobHandler};
use crate::kernel::{
    BaseCrawlProvider, CrawlOptions, CrawlStart, CrawlStatusReport, ProviderCrawlState,
    ProviderPage, ServerDeps,
};

/// How a crawl job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    Completed {
        crawled: u64,
        failed: u64,
        total_size_bytes: i64,
    },
    /// Source was already completed or failed (redelivered job).
    Skipped,
    /// Source was deleted or taken out of the crawl by someone else.
    Aborted,
    Failed(CrawlError),
}

#[derive(Debug, Error)]
#[error("crawl interrupted by worker shutdown")]
struct Interrupted;

/// Result of the per-tick ownership check.
enum SourceCheck {
    Wanted(LinkSource),
    Deleted,
    /// Completed, failed or cancelled by someone else.
    Finished,
    /// Reset for a recrawl or handed to another provider job.
    Superseded,
}

pub struct CrawlJobHandler {
    deps: ServerDeps,
}

impl CrawlJobHandler {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }

    pub async fn process(&self, job: &CrawlLinkSourceJob, ctx: &JobContext) -> Result<CrawlOutcome> {
        let pool = &self.deps.db_pool;

        let Some(source) = LinkSource::find_by_id(job.link_source_id, pool).await? else {
            info!(link_source_id = %job.link_source_id, "Link source no longer exists, dropping crawl job");
            return Ok(CrawlOutcome::Aborted);
        };

        if source.status.is_terminal() {
            info!(
                link_source_id = %source.id,
                status = %source.status,
                "Link source already finished, skipping duplicate crawl job"
            );
            return Ok(CrawlOutcome::Skipped);
        }

        let Some(provider) = self.deps.crawl_provider.clone() else {
            return self.fail(&source, None, CrawlError::ProviderNotConfigured).await;
        };

        if job.crawl_limit == 0 {
            return self.complete_without_pages(&source, ctx).await;
        }

        let provider_job_id = match (&source.status, &source.firecrawl_job_id) {
            (LinkSourceStatus::Crawling, Some(existing)) => {
                info!(
                    link_source_id = %source.id,
                    firecrawl_job_id = %existing,
                    "Resuming crawl after interrupted attempt"
                );
                existing.clone()
            }
            _ => match self.start(&source, job, provider.as_ref()).await? {
                Ok(id) => id,
                Err(e) => return self.fail(&source, None, e).await,
            },
        };
        ctx.report_progress(PROGRESS_STARTED).await;

        let (source, report) = match self
            .poll(source, &provider_job_id, provider.as_ref(), ctx)
            .await?
        {
            PollResult::Finished(source, report) => (source, report),
            PollResult::Aborted => return Ok(CrawlOutcome::Aborted),
            PollResult::TimedOut(source) => {
                if let Err(e) = provider.cancel_crawl(&provider_job_id).await {
                    warn!(link_source_id = %source.id, error = %e, "Failed to cancel timed out provider crawl");
                }
                let minutes = self.deps.crawl_settings.timeout_minutes();
                return self
                    .fail(&source, Some(&provider_job_id), CrawlError::ProviderTimeout { minutes })
                    .await;
            }
        };

        match report.status {
            ProviderCrawlState::Completed => {
                self.persist(&source, &provider_job_id, job, report.pages, ctx)
                    .await
            }
            _ => {
                let message = report.error.unwrap_or_else(|| "Crawl failed".to_string());
                self.fail(
                    &source,
                    Some(&provider_job_id),
                    CrawlError::ProviderReportedFailure(message),
                )
                .await
            }
        }
    }

    /// Move the source to crawling and start the provider job.
    /// The outer error is infrastructure, the inner one is a crawl failure.
    async fn start(
        &self,
        source: &LinkSource,
        job: &CrawlLinkSourceJob,
        provider: &dyn BaseCrawlProvider,
    ) -> Result<Result<String, CrawlError>> {
        let pool = &self.deps.db_pool;
        let settings = &self.deps.crawl_settings;

        if !LinkSource::mark_crawling(source.id, pool).await? {
            return Ok(Err(CrawlError::ProviderStartFailed(
                "link source was removed".to_string(),
            )));
        }

        let options = CrawlOptions {
            limit: job.crawl_limit,
            max_depth: job.max_depth.unwrap_or(settings.default_max_depth),
            include_paths: job.include_paths.clone(),
            exclude_paths: job.exclude_paths.clone(),
        };

        let provider_job_id = match provider.start_crawl(&job.url, &options).await {
            Ok(CrawlStart {
                success: true,
                job_id: Some(id),
                ..
            }) => id,
            Ok(rejected) => {
                let reason = rejected
                    .error
                    .unwrap_or_else(|| "provider returned no job id".to_string());
                return Ok(Err(CrawlError::ProviderStartFailed(reason)));
            }
            Err(e) => return Ok(Err(CrawlError::ProviderStartFailed(format!("{:#}", e)))),
        };

        LinkSource::set_firecrawl_job_id(source.id, &provider_job_id, pool).await?;

        info!(
            link_source_id = %source.id,
            firecrawl_job_id = %provider_job_id,
            limit = options.limit,
            max_depth = options.max_depth,
            "Provider crawl started"
        );

        self.deps
            .realtime
            .emit(
                &EventScope::from(source),
                RealtimeEvent::CrawlStarted {
                    link_source_id: source.id,
                    url: job.url.clone(),
                    firecrawl_job_id: provider_job_id.clone(),
                },
            )
            .await;

        Ok(Ok(provider_job_id))
    }

    async fn poll(
        &self,
        mut source: LinkSource,
        provider_job_id: &str,
        provider: &dyn BaseCrawlProvider,
        ctx: &JobContext,
    ) -> Result<PollResult> {
        let settings = &self.deps.crawl_settings;
        let scope = EventScope::from(&source);
        let mut emitted: HashSet<String> = HashSet::new();

        for attempt in 1..=settings.max_poll_attempts {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => return Err(Interrupted.into()),
                _ = tokio::time::sleep(settings.poll_interval) => {}
            }

            source = match self.check_source(source.id, provider_job_id).await? {
                SourceCheck::Wanted(fresh) => fresh,
                SourceCheck::Deleted => {
                    info!(
                        link_source_id = %source.id,
                        firecrawl_job_id = %provider_job_id,
                        "Link source deleted mid-crawl, cancelling provider job"
                    );
                    if let Err(e) = provider.cancel_crawl(provider_job_id).await {
                        warn!(link_source_id = %source.id, error = %e, "Failed to cancel provider crawl");
                    }
                    return Ok(PollResult::Aborted);
                }
                SourceCheck::Finished => {
                    info!(link_source_id = %source.id, "Link source finished elsewhere, stopping crawl");
                    return Ok(PollResult::Aborted);
                }
                SourceCheck::Superseded => {
                    self.abandon(&source, provider_job_id, provider).await;
                    return Ok(PollResult::Aborted);
                }
            };

            let report = match provider.get_crawl_status(provider_job_id).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(
                        link_source_id = %source.id,
                        attempt,
                        error = %e,
                        "Failed to fetch crawl status"
                    );
                    continue;
                }
            };

            debug!(
                link_source_id = %source.id,
                attempt,
                status = ?report.status,
                completed = report.progress.completed,
                total = report.progress.total,
                "Crawl status polled"
            );

            let discovered = i32::try_from(report.progress.total).unwrap_or(i32::MAX);
            if !LinkSource::set_discovered_count(
                source.id,
                provider_job_id,
                discovered,
                &self.deps.db_pool,
            )
            .await?
            {
                self.abandon(&source, provider_job_id, provider).await;
                return Ok(PollResult::Aborted);
            }

            self.emit_discoveries(&scope, &source, &report, &mut emitted).await;
            ctx.report_progress(provider_progress(
                report.progress.completed,
                report.progress.total,
            ))
            .await;

            if !report.status.is_active() {
                return Ok(PollResult::Finished(source, report));
            }
        }

        warn!(
            link_source_id = %source.id,
            attempts = settings.max_poll_attempts,
            "Crawl did not finish within the polling window"
        );
        Ok(PollResult::TimedOut(source))
    }

    /// The source is still wanted only while it is crawling under this
    /// provider job.
    async fn check_source(&self, id: LinkSourceId, provider_job_id: &str) -> Result<SourceCheck> {
        Ok(match LinkSource::find_any(id, &self.deps.db_pool).await? {
            None => SourceCheck::Deleted,
            Some(s) if s.is_deleted() => SourceCheck::Deleted,
            Some(s) if s.status.is_terminal() => SourceCheck::Finished,
            Some(s)
                if s.status != LinkSourceStatus::Crawling
                    || s.firecrawl_job_id.as_deref() != Some(provider_job_id) =>
            {
                SourceCheck::Superseded
            }
            Some(s) => SourceCheck::Wanted(s),
        })
    }

    /// Another attempt owns the source now: stop our provider job and leave
    /// the source alone.
    async fn abandon(
        &self,
        source: &LinkSource,
        provider_job_id: &str,
        provider: &dyn BaseCrawlProvider,
    ) {
        info!(
            link_source_id = %source.id,
            firecrawl_job_id = %provider_job_id,
            "Link source taken over by a newer crawl, abandoning provider job"
        );
        if let Err(e) = provider.cancel_crawl(provider_job_id).await {
            warn!(link_source_id = %source.id, error = %e, "Failed to cancel superseded provider crawl");
        }
    }

    async fn emit_discoveries(
        &self,
        scope: &EventScope,
        source: &LinkSource,
        report: &CrawlStatusReport,
        emitted: &mut HashSet<String>,
    ) {
        let fresh: Vec<&ProviderPage> = report
            .pages
            .iter()
            .filter(|p| emitted.insert(p.url.clone()))
            .collect();
        if fresh.is_empty() {
            return;
        }

        let realtime = &self.deps.realtime;
        realtime
            .emit(
                scope,
                RealtimeEvent::CrawlPagesDiscovered {
                    link_source_id: source.id,
                    pages: fresh
                        .iter()
                        .map(|p| DiscoveredPage {
                            url: p.url.clone(),
                            title: p.title.clone(),
                        })
                        .collect(),
                    discovered_pages_count: emitted.len() as u64,
                },
            )
            .await;

        let progress = provider_progress(report.progress.completed, report.progress.total);
        for page in fresh {
            realtime
                .emit(
                    scope,
                    RealtimeEvent::CrawlProgress {
                        link_source_id: source.id,
                        progress,
                        completed: report.progress.completed,
                        total: report.progress.total,
                        current_url: Some(page.url.clone()),
                    },
                )
                .await;
        }
    }

    async fn persist(
        &self,
        source: &LinkSource,
        provider_job_id: &str,
        job: &CrawlLinkSourceJob,
        pages: Vec<ProviderPage>,
        ctx: &JobContext,
    ) -> Result<CrawlOutcome> {
        let pool = &self.deps.db_pool;
        let scope = EventScope::from(source);
        let realtime = &self.deps.realtime;

        if !matches!(
            self.check_source(source.id, provider_job_id).await?,
            SourceCheck::Wanted(_)
        ) {
            info!(link_source_id = %source.id, "Link source changed before persisting, dropping results");
            return Ok(CrawlOutcome::Aborted);
        }

        let pages = select_pages(pages, &source.ignored_urls, job.crawl_limit);

        let removed = Knowledge::soft_delete_for_link_source(source.id, pool).await?;
        debug!(link_source_id = %source.id, removed, "Previous pages soft-deleted");
        ctx.report_progress(PROGRESS_PERSISTING).await;

        let features = self.deps.plans.features_for(source.organization_id).await?;
        let usage =
            LinkSource::usage_for_organization(source.organization_id, Some(source.id), pool)
                .await?;
        let mut budget =
            SizeBudget::new(QuotaSnapshot::from_features(&features).remaining_bytes(usage.bytes));

        let total = pages.len();
        let mut crawled = 0u64;
        let mut failed = 0u64;
        let mut total_size_bytes = 0i64;

        for (i, page) in pages.iter().enumerate() {
            if !budget.admit(page.size_bytes) {
                info!(
                    link_source_id = %source.id,
                    persisted = crawled,
                    dropped = total - i,
                    "Size quota reached, remaining pages dropped"
                );
                break;
            }

            match self.persist_page(source, page).await {
                Ok(knowledge) => {
                    budget.consume(knowledge.size_bytes);
                    crawled += 1;
                    total_size_bytes += knowledge.size_bytes;

                    realtime
                        .emit(
                            &scope,
                            RealtimeEvent::CrawlPageCompleted {
                                link_source_id: source.id,
                                knowledge_id: knowledge.id,
                                url: knowledge.source_url.clone(),
                                title: knowledge.source_title.clone(),
                                size_bytes: knowledge.size_bytes,
                            },
                        )
                        .await;
                    realtime
                        .emit(
                            &scope,
                            RealtimeEvent::CrawlProgress {
                                link_source_id: source.id,
                                progress: persistence_progress(i + 1, total),
                                completed: (i + 1) as u64,
                                total: total as u64,
                                current_url: Some(page.url.clone()),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    error!(
                        link_source_id = %source.id,
                        url = %page.url,
                        error = %e,
                        "Failed to persist crawled page"
                    );
                    failed += 1;
                }
            }

            ctx.report_progress(persistence_progress(i + 1, total)).await;
        }

        let crawled_count = i32::try_from(crawled).unwrap_or(i32::MAX);
        let Some(updated) = LinkSource::complete_crawl(
            source.id,
            provider_job_id,
            crawled_count,
            total_size_bytes,
            pool,
        )
        .await?
        else {
            info!(link_source_id = %source.id, "Link source changed before completion");
            return Ok(CrawlOutcome::Aborted);
        };

        info!(
            link_source_id = %source.id,
            crawled,
            failed,
            total_size_bytes,
            "Crawl completed"
        );

        realtime
            .emit(
                &scope,
                RealtimeEvent::CrawlCompleted {
                    link_source_id: source.id,
                    crawled_pages_count: crawled,
                    failed_pages_count: failed,
                    total_size_bytes,
                },
            )
            .await;
        realtime
            .emit(&scope, RealtimeEvent::link_source_updated(&updated))
            .await;
        ctx.report_progress(PROGRESS_DONE).await;

        Ok(CrawlOutcome::Completed {
            crawled,
            failed,
            total_size_bytes,
        })
    }

    /// Upsert one page, retrying once.
    async fn persist_page(&self, source: &LinkSource, page: &ProviderPage) -> Result<Knowledge> {
        let pool = &self.deps.db_pool;
        match Knowledge::upsert_for_crawl(source, page, KnowledgeOrigin::Crawl, pool).await {
            Ok(knowledge) => Ok(knowledge),
            Err(e) => {
                debug!(url = %page.url, error = %e, "Page upsert failed, retrying once");
                Knowledge::upsert_for_crawl(source, page, KnowledgeOrigin::Crawl, pool).await
            }
        }
    }

    /// A crawl allowance of zero pages: clear old pages and finish.
    async fn complete_without_pages(&self, source: &LinkSource, ctx: &JobContext) -> Result<CrawlOutcome> {
        let pool = &self.deps.db_pool;
        info!(link_source_id = %source.id, "No page allowance left, completing without crawl");

        Knowledge::soft_delete_for_link_source(source.id, pool).await?;
        let Some(updated) = LinkSource::mark_completed(source.id, 0, 0, pool).await? else {
            return Ok(CrawlOutcome::Aborted);
        };

        let scope = EventScope::from(source);
        self.deps
            .realtime
            .emit(
                &scope,
                RealtimeEvent::CrawlCompleted {
                    link_source_id: source.id,
                    crawled_pages_count: 0,
                    failed_pages_count: 0,
                    total_size_bytes: 0,
                },
            )
            .await;
        self.deps
            .realtime
            .emit(&scope, RealtimeEvent::link_source_updated(&updated))
            .await;
        ctx.report_progress(PROGRESS_DONE).await;

        Ok(CrawlOutcome::Completed {
            crawled: 0,
            failed: 0,
            total_size_bytes: 0,
        })
    }

    /// Mark the source failed. Once a provider job exists, only the attempt
    /// that owns it may do so.
    async fn fail(
        &self,
        source: &LinkSource,
        provider_job_id: Option<&str>,
        error: CrawlError,
    ) -> Result<CrawlOutcome> {
        let message = error.to_string();
        warn!(link_source_id = %source.id, error = %message, "Crawl failed");

        let pool = &self.deps.db_pool;
        let updated = match provider_job_id {
            Some(job_id) => LinkSource::fail_crawl(source.id, job_id, &message, pool).await?,
            None => LinkSource::mark_failed(source.id, &message, pool).await?,
        };
        match updated {
            Some(updated) => {
                self.emit_failure(&updated, message).await;
                Ok(CrawlOutcome::Failed(error))
            }
            None => Ok(CrawlOutcome::Aborted),
        }
    }

    async fn emit_failure(&self, source: &LinkSource, error: String) {
        let scope = EventScope::from(source);
        self.deps
            .realtime
            .emit(
                &scope,
                RealtimeEvent::CrawlFailed {
                    link_source_id: source.id,
                    error,
                },
            )
            .await;
        self.deps
            .realtime
            .emit(&scope, RealtimeEvent::link_source_updated(source))
            .await;
    }
}

enum PollResult {
    Finished(LinkSource, CrawlStatusReport),
    TimedOut(LinkSource),
    Aborted,
}

#[async_trait]
impl JobHandler for CrawlJobHandler {
    fn job_type(&self) -> &'static str {
        CrawlLinkSourceJob::JOB_TYPE
    }

    async fn handle(&self, job: &ClaimedJob, ctx: &JobContext) -> Result<(), JobFailure> {
        let payload: CrawlLinkSourceJob = job
            .deserialize()
            .map_err(|e| JobFailure::non_retryable(format!("{:#}", e)))?;

        match self.process(&payload, ctx).await {
            Ok(CrawlOutcome::Failed(e)) => Err(JobFailure::non_retryable(e)),
            Ok(outcome) => {
                debug!(link_source_id = %payload.link_source_id, ?outcome, "Crawl job finished");
                Ok(())
            }
            Err(e) if e.is::<Interrupted>() => Err(JobFailure::shutdown()),
            Err(e) => {
                error!(
                    link_source_id = %payload.link_source_id,
                    retry_count = job.retry_count,
                    error = %e,
                    "Crawl job errored"
                );
                if job.retry_count >= job.max_retries {
                    self.give_up(&payload, &e).await;
                }
                Err(JobFailure::from(e))
            }
        }
    }
}

impl CrawlJobHandler {
    /// Last attempt failed: the source must not stay in flight.
    async fn give_up(&self, job: &CrawlLinkSourceJob, cause: &anyhow::Error) {
        let message = format!("Crawl failed: {:#}", cause);
        match LinkSource::mark_failed(job.link_source_id, &message, &self.deps.db_pool).await {
            Ok(Some(updated)) => self.emit_failure(&updated, message).await,
            Ok(None) => {}
            Err(e) => error!(
                link_source_id = %job.link_source_id,
                error = %e,
                "Failed to mark link source failed after final attempt"
            ),
        }
    }
}

/// Handler as a trait object for [`crate::kernel::jobs::JobWorker::with_handler`].
pub fn crawl_job_handler(deps: ServerDeps) -> Arc<dyn JobHandler> {
    Arc::new(CrawlJobHandler::new(deps))
}
