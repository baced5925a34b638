//! Typed ids for every entity the ingestion pipeline touches.
//!
//! Tenancy entities (organizations, websites, agents, users) are owned by
//! other services; only their ids pass through here.

pub use super::id::Id;

/// Marker type for crawl targets.
pub struct LinkSource;

/// Marker type for persisted crawled pages.
pub struct Knowledge;

/// Marker type for tenant organizations.
pub struct Organization;

/// Marker type for tenant websites (the realtime fan-out key).
pub struct Website;

/// Marker type for AI agents a link source may be attached to.
pub struct AiAgent;

/// Marker type for dashboard users.
pub struct User;

/// Marker type for queued background jobs.
pub struct BackgroundJob;

pub type LinkSourceId = Id<LinkSource>;
pub type KnowledgeId = Id<Knowledge>;
pub type OrganizationId = Id<Organization>;
pub type WebsiteId = Id<Website>;
pub type AiAgentId = Id<AiAgent>;
pub type UserId = Id<User>;
pub type JobId = Id<BackgroundJob>;
