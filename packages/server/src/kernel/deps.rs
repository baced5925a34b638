//! Server dependencies for domain actions and job handlers.
//!
//! All external services sit behind trait objects so tests can swap them.

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::CrawlSettings;
use crate::domains::realtime::RealtimeDispatcher;
use crate::kernel::jobs::JobQueue;
use crate::kernel::{BaseCrawlProvider, BasePlanProvider};

#[derive(Clone)]
pub struct ServerDeps {
    pub db_pool: PgPool,
    /// `None` when no provider API key is configured
    pub crawl_provider: Option<Arc<dyn BaseCrawlProvider>>,
    pub realtime: RealtimeDispatcher,
    pub job_queue: Arc<dyn JobQueue>,
    pub plans: Arc<dyn BasePlanProvider>,
    pub crawl_settings: CrawlSettings,
}

impl ServerDeps {
    pub fn new(
        db_pool: PgPool,
        crawl_provider: Option<Arc<dyn BaseCrawlProvider>>,
        realtime: RealtimeDispatcher,
        job_queue: Arc<dyn JobQueue>,
        plans: Arc<dyn BasePlanProvider>,
        crawl_settings: CrawlSettings,
    ) -> Self {
        Self {
            db_pool,
            crawl_provider,
            realtime,
            job_queue,
            plans,
            crawl_settings,
        }
    }
}
