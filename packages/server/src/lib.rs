// Crawl ingestion core
//
// Takes "crawl this URL" requests through job submission, third-party crawl
// polling, incremental persistence and realtime progress reporting.
//
// Business logic lives in domains/*; kernel/ holds infrastructure seams.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
