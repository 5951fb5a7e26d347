//! Bus publish interface, plus NATS JetStream and in-memory implementations,
//! for the eventide scheduler's Dispatcher.

pub mod error;

pub use error::BusError;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Default JetStream stream name for published events.
const DEFAULT_STREAM_NAME: &str = "EVENTIDE_EVENTS";

/// Subject prefix events are published under; the full subject is
/// `{prefix}.{topic}`.
const SUBJECT_PREFIX: &str = "eventide";

/// Where a publish landed, for the analytics row's `bus_partition`/
/// `bus_offset` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Partition the message landed in (always 0 for NATS; kept for parity
    /// with partitioned brokers and for the in-memory double's symmetry).
    pub partition: i64,
    /// Broker-assigned offset/sequence the message landed at.
    pub offset: i64,
}

/// A message to publish: a topic, an opaque JSON payload, and headers.
/// `correlation_id` is carried as a header so it survives end to end.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Bus topic to publish to.
    pub topic: String,
    /// Message payload.
    pub payload: serde_json::Value,
    /// Headers, including the correlation id.
    pub headers: HashMap<String, String>,
}

/// Publish interface the Dispatcher uses to hand a claimed event to the
/// outside world. At-most-one-publish for a given event id is enforced
/// upstream by the K-tier claim lock, not by this trait.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes a message, returning where it landed.
    async fn publish(&self, message: OutboundMessage) -> Result<PublishReceipt, BusError>;
}

/// Configuration for a NATS-backed bus.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// JetStream stream name (defaults to `EVENTIDE_EVENTS`).
    pub stream_name: Option<String>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(DEFAULT_STREAM_NAME)
    }
}

/// A NATS JetStream-backed `Bus`.
pub struct NatsBus {
    jetstream: async_nats::jetstream::Context,
}

impl NatsBus {
    /// Connects to NATS and ensures the publish stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    pub async fn new(config: NatsConfig) -> Result<Self, BusError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| BusError::ConnectionFailed {
                message: e.to_string(),
            })?;

        let jetstream = async_nats::jetstream::new(client);
        Self::ensure_stream(&jetstream, &config).await?;

        Ok(Self { jetstream })
    }

    async fn ensure_stream(
        jetstream: &async_nats::jetstream::Context,
        config: &NatsConfig,
    ) -> Result<(), BusError> {
        let stream_config = async_nats::jetstream::stream::Config {
            name: config.stream().to_string(),
            subjects: vec![format!("{SUBJECT_PREFIX}.>")],
            storage: async_nats::jetstream::stream::StorageType::File,
            retention: async_nats::jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| BusError::ConnectionFailed {
                message: format!("failed to create stream: {e}"),
            })?;

        Ok(())
    }

    fn subject(topic: &str) -> String {
        format!("{SUBJECT_PREFIX}.{topic}")
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, message: OutboundMessage) -> Result<PublishReceipt, BusError> {
        let bytes = serde_json::to_vec(&message.payload).map_err(|e| BusError::Serialization {
            message: e.to_string(),
        })?;

        let mut headers = async_nats::HeaderMap::new();
        for (key, value) in &message.headers {
            headers.insert(key.as_str(), value.as_str());
        }

        let ack = self
            .jetstream
            .publish_with_headers(Self::subject(&message.topic), headers, bytes.into())
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| BusError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(PublishReceipt {
            partition: 0,
            offset: ack.sequence as i64,
        })
    }
}

/// An in-memory `Bus` for tests and local development.
#[derive(Default)]
pub struct InMemoryBus {
    published: Mutex<Vec<OutboundMessage>>,
}

impl InMemoryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, message: OutboundMessage) -> Result<PublishReceipt, BusError> {
        let mut published = self.published.lock().unwrap();
        let offset = published.len() as i64;
        published.push(message);
        Ok(PublishReceipt { partition: 0, offset })
    }
}
