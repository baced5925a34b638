use thiserror::Error;

/// Fatal crawl failures. The display text is what the user sees as the
/// link source's error message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrawlError {
    #[error("Crawl provider is not configured")]
    ProviderNotConfigured,

    #[error("Failed to start crawl: {0}")]
    ProviderStartFailed(String),

    #[error("Crawl timed out after {minutes} minutes")]
    ProviderTimeout { minutes: u64 },

    #[error("{0}")]
    ProviderReportedFailure(String),
}
