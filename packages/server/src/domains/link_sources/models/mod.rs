pub mod knowledge;
pub mod link_source;

pub use knowledge::{Knowledge, KnowledgeOrigin, KnowledgePayload};
pub use link_source::{
    LinkSource, LinkSourceFilter, LinkSourcePatch, LinkSourceStatus, NewLinkSource,
    OrganizationUsage,
};
