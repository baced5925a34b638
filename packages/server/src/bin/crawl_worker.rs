//! Crawl worker
//!
//! Claims crawl jobs from the database queue, drives the crawl provider and
//! publishes progress onto the realtime stream. Runs until Ctrl-C / SIGTERM,
//! then drains in-flight jobs.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ingest_core::domains::crawling::crawl_job_handler;
use ingest_core::domains::quota::StaticPlanProvider;
use ingest_core::domains::realtime::RealtimeDispatcher;
use ingest_core::kernel::jobs::{JobWorker, JobWorkerConfig, PostgresJobQueue};
use ingest_core::kernel::{BaseCrawlProvider, FirecrawlClient, NatsClientPublisher, ServerDeps, ServiceHost};
use ingest_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "crawl_worker")]
#[command(about = "Background worker that runs link-source crawls")]
struct Args {
    /// Crawl jobs run at the same time (overrides CRAWL_WORKER_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stable worker id, defaults to a random one
    #[arg(long, env = "CRAWL_WORKER_ID")]
    worker_id: Option<String>,

    /// Skip running database migrations at start-up
    #[arg(long)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ingest_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Starting crawl worker");

    let pool = PgPoolOptions::new()
        .max_connections(config.worker_concurrency as u32 * 2 + 2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    if !args.skip_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        tracing::info!("Database migrations applied");
    }

    let publisher = NatsClientPublisher::connect(&config.nats_url, config.realtime_stream_max_messages)
        .await
        .context("Failed to connect to NATS")?;

    let crawl_provider: Option<Arc<dyn BaseCrawlProvider>> = match &config.firecrawl_api_key {
        Some(key) => Some(Arc::new(FirecrawlClient::with_base_url(
            key.clone(),
            config.firecrawl_api_url.clone(),
        )?)),
        None => {
            tracing::warn!("FIRECRAWL_API_KEY not set, crawl jobs will fail as not configured");
            None
        }
    };

    let job_queue = Arc::new(PostgresJobQueue::new(pool.clone()));
    let deps = ServerDeps::new(
        pool,
        crawl_provider,
        RealtimeDispatcher::new(Arc::new(publisher)),
        job_queue.clone(),
        Arc::new(StaticPlanProvider::new(config.default_plan)),
        config.crawl.clone(),
    );

    let mut worker_config = match args.worker_id {
        Some(id) => JobWorkerConfig::with_worker_id(id),
        None => JobWorkerConfig::default(),
    };
    worker_config = worker_config.with_concurrency(args.concurrency.unwrap_or(config.worker_concurrency));

    tracing::info!(
        worker_id = %worker_config.worker_id,
        concurrency = worker_config.concurrency,
        poll_interval_secs = config.crawl.poll_interval.as_secs(),
        max_poll_attempts = config.crawl.max_poll_attempts,
        "Crawl worker configured"
    );

    let worker = JobWorker::new(job_queue, worker_config).with_handler(crawl_job_handler(deps));

    ServiceHost::new()
        .with_service(worker)
        .run_until_shutdown()
        .await?;

    tracing::info!("Crawl worker stopped");
    Ok(())
}
