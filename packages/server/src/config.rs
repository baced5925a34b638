use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::quota::{FeatureValue, PlanFeatures};

/// Tuning for the crawl job handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    /// Sleep between provider status polls
    pub poll_interval: Duration,
    /// Poll ticks before a crawl is declared timed out
    pub max_poll_attempts: u32,
    /// Depth forwarded to the provider when a source does not narrow it
    pub default_max_depth: u32,
    /// Page limit sent to the provider when the plan allows unlimited pages
    pub unlimited_page_cap: u64,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 360,
            default_max_depth: 5,
            unlimited_page_cap: 10_000,
        }
    }
}

impl CrawlSettings {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_poll_attempts(mut self, max_poll_attempts: u32) -> Self {
        self.max_poll_attempts = max_poll_attempts;
        self
    }

    pub fn with_default_max_depth(mut self, default_max_depth: u32) -> Self {
        self.default_max_depth = default_max_depth;
        self
    }

    /// Length of the whole polling window, rounded up to minutes.
    pub fn timeout_minutes(&self) -> u64 {
        let secs = self.poll_interval.as_secs_f64() * self.max_poll_attempts as f64;
        (secs / 60.0).ceil() as u64
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    /// `None` leaves the crawl provider unconfigured; crawls then fail fast.
    pub firecrawl_api_key: Option<String>,
    pub firecrawl_api_url: String,
    pub worker_concurrency: usize,
    pub realtime_stream_max_messages: i64,
    pub crawl: CrawlSettings,
    pub default_plan: PlanFeatures,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = CrawlSettings::default();

        let crawl = CrawlSettings {
            poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "CRAWL_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            max_poll_attempts: parse_or(
                &lookup,
                "CRAWL_MAX_POLL_ATTEMPTS",
                defaults.max_poll_attempts,
            )?,
            default_max_depth: parse_or(
                &lookup,
                "CRAWL_DEFAULT_MAX_DEPTH",
                defaults.default_max_depth,
            )?,
            unlimited_page_cap: defaults.unlimited_page_cap,
        };

        let default_plan = PlanFeatures {
            link_sources: parse_or(&lookup, "PLAN_LINK_SOURCES", FeatureValue::Unlimited)?,
            total_pages: parse_or(&lookup, "PLAN_TOTAL_PAGES", FeatureValue::Unlimited)?,
            pages_per_crawl: parse_or(&lookup, "PLAN_PAGES_PER_CRAWL", FeatureValue::Unlimited)?,
            size_limit_bytes: parse_or(&lookup, "PLAN_SIZE_LIMIT_BYTES", FeatureValue::Unlimited)?,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string()),
            firecrawl_api_key: lookup("FIRECRAWL_API_KEY").filter(|k| !k.trim().is_empty()),
            firecrawl_api_url: lookup("FIRECRAWL_API_URL")
                .unwrap_or_else(|| crate::kernel::FIRECRAWL_API_URL.to_string()),
            worker_concurrency: parse_or(&lookup, "CRAWL_WORKER_CONCURRENCY", 3usize)?,
            realtime_stream_max_messages: parse_or(
                &lookup,
                "REALTIME_STREAM_MAX_MESSAGES",
                10_000i64,
            )?,
            crawl,
            default_plan,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        _ => Ok(default),
    }
}
