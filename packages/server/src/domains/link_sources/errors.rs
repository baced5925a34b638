use thiserror::Error;

use crate::domains::quota::Limit;

/// Errors surfaced by link-source actions
#[derive(Debug, Error)]
pub enum LinkSourceError {
    #[error("Link source not found")]
    NotFound,

    #[error("A link source for this URL already exists")]
    Conflict,

    #[error("A crawl is already in progress for this link source")]
    AlreadyCrawling,

    #[error("Plan limit reached: {resource} (limit {limit})")]
    QuotaExceeded { resource: &'static str, limit: Limit },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Crawl provider is not configured")]
    ProviderNotConfigured,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for LinkSourceError {
    fn from(e: sqlx::Error) -> Self {
        LinkSourceError::Internal(e.into())
    }
}

pub type LinkSourceResult<T> = std::result::Result<T, LinkSourceError>;
