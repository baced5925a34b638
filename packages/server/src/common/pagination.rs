//! Cursor-based pagination.
//!
//! Cursors are the base64-encoded id of the last item on a page. Ids are v7
//! UUIDs, so ordering by id is ordering by creation time.
//!
//! ```rust,ignore
//! let args = PaginationArgs { first: Some(20), after: None }.validate()?;
//! let (items, has_more) = LinkSource::list(&filter, &args, pool).await?;
//! let page = Connection::build(items, has_more, |s| s.id.into_uuid());
//! ```

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Opaque pagination cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(Uuid);

impl Cursor {
    pub fn new(id: Uuid) -> Self {
        Cursor(id)
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .context("Invalid cursor: not valid base64")?;
        let uuid = Uuid::from_slice(&bytes).context("Invalid cursor: not a valid UUID")?;
        Ok(Cursor(uuid))
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

/// Raw pagination input as received from a caller.
#[derive(Debug, Clone, Default)]
pub struct PaginationArgs {
    pub first: Option<i64>,
    pub after: Option<String>,
}

impl PaginationArgs {
    pub fn validate(&self) -> Result<ValidatedPagination> {
        let limit = match self.first {
            None => DEFAULT_PAGE_SIZE,
            Some(n) if n < 1 => bail!("first must be at least 1"),
            Some(n) => n.min(MAX_PAGE_SIZE),
        };
        let after = self
            .after
            .as_deref()
            .map(Cursor::decode)
            .transpose()?
            .map(Cursor::into_uuid);

        Ok(ValidatedPagination { limit, after })
    }
}

/// Pagination ready to bind into a query.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedPagination {
    pub limit: i64,
    pub after: Option<Uuid>,
}

impl ValidatedPagination {
    /// Rows to fetch: one extra to detect whether another page exists.
    pub fn fetch_limit(&self) -> i64 {
        self.limit + 1
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl<T> Connection<T> {
    /// Build a page from rows fetched with `fetch_limit()`.
    pub fn build(mut items: Vec<T>, limit: i64, id_of: impl Fn(&T) -> Uuid) -> Self {
        let has_next_page = items.len() as i64 > limit;
        items.truncate(limit.max(0) as usize);
        let end_cursor = items.last().map(|item| Cursor::new(id_of(item)).encode());

        Connection {
            items,
            has_next_page,
            end_cursor,
        }
    }
}
