//! NATS client abstraction for production and testing.
//!
//! Realtime events go to a JetStream stream so late subscribers can catch up.
//! The stream is bounded by message count and discards the oldest entries
//! once full.

use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::RwLock;
use tracing::info;

/// Name of the JetStream stream carrying dashboard realtime events.
pub const REALTIME_STREAM: &str = "REALTIME";

/// Subject prefix captured by [`REALTIME_STREAM`].
pub const REALTIME_SUBJECT_PREFIX: &str = "realtime";

/// A published message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Trait for NATS publish operations.
///
/// This allows swapping between real NATS and test mocks.
#[async_trait]
pub trait NatsPublisher: Send + Sync {
    /// Publish a message to a subject.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// JetStream-backed publisher writing into a length-bounded stream.
pub struct NatsClientPublisher {
    context: jetstream::Context,
}

impl NatsClientPublisher {
    /// Connect to NATS and make sure the bounded realtime stream exists.
    pub async fn connect(url: &str, max_messages: i64) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", url))?;
        Self::with_client(client, max_messages).await
    }

    pub async fn with_client(client: async_nats::Client, max_messages: i64) -> Result<Self> {
        let context = jetstream::new(client);
        context
            .get_or_create_stream(stream::Config {
                name: REALTIME_STREAM.to_string(),
                subjects: vec![format!("{}.>", REALTIME_SUBJECT_PREFIX)],
                max_messages,
                discard: stream::DiscardPolicy::Old,
                ..Default::default()
            })
            .await
            .context("Failed to create realtime stream")?;

        info!(stream = REALTIME_STREAM, max_messages, "realtime stream ready");
        Ok(Self { context })
    }
}

#[async_trait]
impl NatsPublisher for NatsClientPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        // The second await waits for the stream to acknowledge the write.
        self.context.publish(subject, payload).await?.await?;
        Ok(())
    }
}

/// Mock NATS client that records published messages for tests.
#[derive(Default)]
pub struct TestNats {
    published: RwLock<Vec<PublishedMessage>>,
}

impl TestNats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish(&self, subject: String, payload: Bytes) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Payloads of every published message, parsed as JSON.
    pub fn json_payloads(&self) -> Vec<serde_json::Value> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    /// The `type` tag of every published JSON payload, in publish order.
    pub fn event_types(&self) -> Vec<String> {
        self.json_payloads()
            .iter()
            .filter_map(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl NatsPublisher for TestNats {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.record_publish(subject, payload);
        Ok(())
    }
}
