//! Crawling domain - background crawl of link sources through the provider
//!
//! # Components
//!
//! - `jobs` - the queued job payload plus enqueue/cancel helpers
//! - `worker` - `CrawlJobHandler`, the job handler that polls the provider and persists pages
//! - `progress` - pure helpers (progress bands, page selection, byte budget)
//! - `errors` - fatal crawl failures shown to users

pub mod errors;
pub mod jobs;
pub mod progress;
pub mod worker;

pub use errors::CrawlError;
pub use jobs::{cancel_crawl_job, enqueue_crawl, CrawlLinkSourceJob};
pub use worker::{crawl_job_handler, CrawlJobHandler, CrawlOutcome};
