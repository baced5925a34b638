//! Realtime events for dashboard sessions.
//!
//! Events are a latency optimisation: they carry enough denormalised data for
//! a client to update its view, but the database rows stay authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{AiAgentId, KnowledgeId, LinkSourceId, OrganizationId, WebsiteId};
use crate::domains::link_sources::models::{LinkSource, LinkSourceStatus};

/// A page seen in partial provider results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredPage {
    pub url: String,
    pub title: Option<String>,
}

/// Link-source state as shown in the dashboard list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSourceSnapshot {
    pub id: LinkSourceId,
    pub url: String,
    pub status: LinkSourceStatus,
    pub error_message: Option<String>,
    pub discovered_pages_count: i32,
    pub crawled_pages_count: i32,
    pub total_size_bytes: i64,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl From<&LinkSource> for LinkSourceSnapshot {
    fn from(source: &LinkSource) -> Self {
        Self {
            id: source.id,
            url: source.url.clone(),
            status: source.status,
            error_message: source.error_message.clone(),
            discovered_pages_count: source.discovered_pages_count,
            crawled_pages_count: source.crawled_pages_count,
            total_size_bytes: source.total_size_bytes,
            last_crawled_at: source.last_crawled_at,
            deleted: source.deleted_at.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RealtimeEvent {
    CrawlStarted {
        link_source_id: LinkSourceId,
        url: String,
        firecrawl_job_id: String,
    },
    CrawlPagesDiscovered {
        link_source_id: LinkSourceId,
        pages: Vec<DiscoveredPage>,
        discovered_pages_count: u64,
    },
    CrawlProgress {
        link_source_id: LinkSourceId,
        progress: u8,
        completed: u64,
        total: u64,
        current_url: Option<String>,
    },
    CrawlPageCompleted {
        link_source_id: LinkSourceId,
        knowledge_id: KnowledgeId,
        url: String,
        title: Option<String>,
        size_bytes: i64,
    },
    CrawlCompleted {
        link_source_id: LinkSourceId,
        crawled_pages_count: u64,
        failed_pages_count: u64,
        total_size_bytes: i64,
    },
    CrawlFailed {
        link_source_id: LinkSourceId,
        error: String,
    },
    LinkSourceUpdated {
        link_source: LinkSourceSnapshot,
    },
}

impl RealtimeEvent {
    /// Wire name of the event, as found in the `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            RealtimeEvent::CrawlStarted { .. } => "crawlStarted",
            RealtimeEvent::CrawlPagesDiscovered { .. } => "crawlPagesDiscovered",
            RealtimeEvent::CrawlProgress { .. } => "crawlProgress",
            RealtimeEvent::CrawlPageCompleted { .. } => "crawlPageCompleted",
            RealtimeEvent::CrawlCompleted { .. } => "crawlCompleted",
            RealtimeEvent::CrawlFailed { .. } => "crawlFailed",
            RealtimeEvent::LinkSourceUpdated { .. } => "linkSourceUpdated",
        }
    }

    pub fn link_source_updated(source: &LinkSource) -> Self {
        RealtimeEvent::LinkSourceUpdated {
            link_source: LinkSourceSnapshot::from(source),
        }
    }
}

/// Tenant routing for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventScope {
    pub website_id: WebsiteId,
    pub organization_id: OrganizationId,
    pub ai_agent_id: Option<AiAgentId>,
}

impl From<&LinkSource> for EventScope {
    fn from(source: &LinkSource) -> Self {
        Self {
            website_id: source.website_id,
            organization_id: source.organization_id,
            ai_agent_id: source.ai_agent_id,
        }
    }
}

/// What actually goes on the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMessage {
    #[serde(flatten)]
    pub event: RealtimeEvent,
    pub website_id: WebsiteId,
    pub organization_id: OrganizationId,
    pub ai_agent_id: Option<AiAgentId>,
    pub emitted_at: DateTime<Utc>,
}

impl RealtimeMessage {
    pub fn new(scope: &EventScope, event: RealtimeEvent) -> Self {
        Self {
            event,
            website_id: scope.website_id,
            organization_id: scope.organization_id,
            ai_agent_id: scope.ai_agent_id,
            emitted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_tagged_with_camel_case_type() {
        let id = LinkSourceId::new();
        let event = RealtimeEvent::CrawlCompleted {
            link_source_id: id,
            crawled_pages_count: 5,
            failed_pages_count: 1,
            total_size_bytes: 50_000,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "crawlCompleted",
                "linkSourceId": id,
                "crawledPagesCount": 5,
                "failedPagesCount": 1,
                "totalSizeBytes": 50_000
            })
        );
        assert_eq!(event.event_type(), "crawlCompleted");
    }

    #[test]
    fn envelope_flattens_event_next_to_tenant_ids() {
        let scope = EventScope {
            website_id: WebsiteId::new(),
            organization_id: OrganizationId::new(),
            ai_agent_id: None,
        };
        let message = RealtimeMessage::new(
            &scope,
            RealtimeEvent::CrawlFailed {
                link_source_id: LinkSourceId::new(),
                error: "Crawl timed out after 30 minutes".to_string(),
            },
        );

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "crawlFailed");
        assert_eq!(value["websiteId"], json!(scope.website_id));
        assert_eq!(value["error"], "Crawl timed out after 30 minutes");
        assert!(value.get("emittedAt").is_some());

        let back: RealtimeMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back.event, message.event);
    }
}
