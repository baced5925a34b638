//! Pure helpers used by the crawl worker: progress bands, page selection and
//! the byte budget.

use std::collections::HashSet;

use crate::domains::quota::Limit;
use crate::kernel::ProviderPage;

/// Progress once the provider crawl is started.
pub const PROGRESS_STARTED: u8 = 10;
/// Progress once the provider crawl is done and local persistence begins.
pub const PROGRESS_PERSISTING: u8 = 80;
pub const PROGRESS_DONE: u8 = 100;

/// Map provider counters into the 10..=80 band.
pub fn provider_progress(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return PROGRESS_STARTED;
    }
    let ratio = completed.min(total) as f64 / total as f64;
    let span = (PROGRESS_PERSISTING - PROGRESS_STARTED) as f64;
    PROGRESS_STARTED + (ratio * span).round() as u8
}

/// Map persisted pages into the 80..=100 band.
pub fn persistence_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return PROGRESS_DONE;
    }
    let ratio = done.min(total) as f64 / total as f64;
    let span = (PROGRESS_DONE - PROGRESS_PERSISTING) as f64;
    PROGRESS_PERSISTING + (ratio * span).round() as u8
}

/// Final page list in provider order: first occurrence of each URL, ignored
/// URLs dropped, at most `limit` pages.
pub fn select_pages(pages: Vec<ProviderPage>, ignored_urls: &[String], limit: u64) -> Vec<ProviderPage> {
    let ignored: HashSet<&str> = ignored_urls.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();

    pages
        .into_iter()
        .filter(|p| !ignored.contains(p.url.as_str()))
        .filter(|p| seen.insert(p.url.clone()))
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .collect()
}

/// Bytes a source may still store. Once a page does not fit, nothing after
/// it is accepted either.
#[derive(Debug, Clone, Copy)]
pub struct SizeBudget {
    limit: Limit,
    used: u64,
    exhausted: bool,
}

impl SizeBudget {
    pub fn new(limit: Limit) -> Self {
        Self {
            limit,
            used: 0,
            exhausted: false,
        }
    }

    /// Whether a page of `size` bytes still fits. A `false` answer is final.
    pub fn admit(&mut self, size: i64) -> bool {
        if self.exhausted {
            return false;
        }
        let size = size.max(0) as u64;
        if self.limit.allows(self.used.saturating_add(size)) {
            true
        } else {
            self.exhausted = true;
            false
        }
    }

    /// Count bytes that were actually stored.
    pub fn consume(&mut self, size: i64) {
        self.used = self.used.saturating_add(size.max(0) as u64);
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Length of the longest prefix of `sizes` whose running total stays within `limit`.
pub fn prefix_within_budget(sizes: &[i64], limit: Limit) -> usize {
    let mut budget = SizeBudget::new(limit);
    sizes
        .iter()
        .take_while(|&&size| {
            let fits = budget.admit(size);
            if fits {
                budget.consume(size);
            }
            fits
        })
        .count()
}
