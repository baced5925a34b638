//! Link sources - registered crawl targets and the pages crawled from them

pub mod actions;
pub mod errors;
pub mod models;
pub mod tree;

pub use errors::{LinkSourceError, LinkSourceResult};
pub use models::{
    Knowledge, KnowledgeOrigin, KnowledgePayload, LinkSource, LinkSourceFilter, LinkSourcePatch,
    LinkSourceStatus, NewLinkSource,
};
pub use tree::{build_domain_tree, DomainTreeNode};
