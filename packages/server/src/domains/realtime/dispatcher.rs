//! Best-effort publisher for realtime events.
//!
//! A failed publish is retried a few times and then dropped. Callers never see
//! the error: losing a progress event must not fail the crawl that produced it.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::events::{EventScope, RealtimeEvent, RealtimeMessage};
use crate::common::WebsiteId;
use crate::kernel::nats::REALTIME_SUBJECT_PREFIX;
use crate::kernel::NatsPublisher;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Subject a website's dashboard sessions listen on.
pub fn website_subject(website_id: WebsiteId) -> String {
    format!("{}.website.{}", REALTIME_SUBJECT_PREFIX, website_id)
}

#[derive(Clone)]
pub struct RealtimeDispatcher {
    publisher: Arc<dyn NatsPublisher>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl RealtimeDispatcher {
    pub fn new(publisher: Arc<dyn NatsPublisher>) -> Self {
        Self {
            publisher,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_backoff = base_backoff;
        self
    }

    /// Publish an event to the scope's website stream. Returns whether it was delivered.
    pub async fn emit(&self, scope: &EventScope, event: RealtimeEvent) -> bool {
        let event_type = event.event_type();
        let message = RealtimeMessage::new(scope, event);

        let payload = match serde_json::to_vec(&message) {
            Ok(p) => Bytes::from(p),
            Err(e) => {
                warn!(event_type, error = %e, "failed to serialize realtime event");
                return false;
            }
        };
        let subject = website_subject(scope.website_id);

        for attempt in 1..=self.max_attempts {
            match self.publisher.publish(subject.clone(), payload.clone()).await {
                Ok(()) => {
                    debug!(event_type, subject = %subject, "realtime event published");
                    return true;
                }
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                    debug!(event_type, attempt, error = %e, "realtime publish failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        event_type,
                        website_id = %scope.website_id,
                        attempts = attempt,
                        error = %e,
                        "dropping realtime event after retries"
                    );
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{LinkSourceId, OrganizationId};
    use crate::kernel::TestNats;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyPublisher {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NatsPublisher for FlakyPublisher {
        async fn publish(&self, _subject: String, _payload: Bytes) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("stream unavailable");
            }
            Ok(())
        }
    }

    fn scope() -> EventScope {
        EventScope {
            website_id: WebsiteId::new(),
            organization_id: OrganizationId::new(),
            ai_agent_id: None,
        }
    }

    fn failed_event() -> RealtimeEvent {
        RealtimeEvent::CrawlFailed {
            link_source_id: LinkSourceId::new(),
            error: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn publishes_to_website_subject() {
        let nats = Arc::new(TestNats::new());
        let dispatcher = RealtimeDispatcher::new(nats.clone());
        let scope = scope();

        assert!(dispatcher.emit(&scope, failed_event()).await);

        let messages = nats.messages_for_subject(&website_subject(scope.website_id));
        assert_eq!(messages.len(), 1);
        assert_eq!(nats.event_types(), vec!["crawlFailed"]);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let publisher = Arc::new(FlakyPublisher {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let dispatcher =
            RealtimeDispatcher::new(publisher.clone()).with_retry(3, Duration::from_millis(1));

        assert!(dispatcher.emit(&scope(), failed_event()).await);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_quietly_after_max_attempts() {
        let publisher = Arc::new(FlakyPublisher {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        });
        let dispatcher =
            RealtimeDispatcher::new(publisher.clone()).with_retry(3, Duration::from_millis(1));

        assert!(!dispatcher.emit(&scope(), failed_event()).await);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn subject_format() {
        let id = WebsiteId::new();
        assert_eq!(website_subject(id), format!("realtime.website.{}", id));
    }
}
