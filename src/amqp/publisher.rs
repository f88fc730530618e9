//! AMQP event publisher for outbound lobby events

use crate::amqp::messages::{MessageEnvelope, EVENTS_EXCHANGE};
use crate::error::{Result, ServiceError};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Sink for lobby events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: LobbyEvent) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: std::sync::Mutex<HashSet<String>>, // For deduplication
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: std::sync::Mutex::new(HashSet::new()),
        };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            ServiceError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare events exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared events exchange: {}", self.config.exchange);
        Ok(())
    }

    fn already_published(&self, correlation_id: &str) -> Result<bool> {
        let published = self
            .published_messages
            .lock()
            .map_err(|_| ServiceError::InternalError {
                message: "Failed to acquire published messages lock".to_string(),
            })?;
        Ok(published.contains(correlation_id))
    }

    /// Publish an envelope with retry and exponential backoff
    async fn publish_envelope(&self, envelope: &MessageEnvelope<LobbyEvent>) -> Result<()> {
        if self.config.enable_deduplication && self.already_published(&envelope.correlation_id)? {
            debug!(
                "Message {} already published, skipping",
                envelope.correlation_id
            );
            return Ok(());
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published = self.published_messages.lock().map_err(|_| {
                            ServiceError::InternalError {
                                message: "Failed to acquire published messages lock".to_string(),
                            }
                        })?;
                        published.insert(envelope.correlation_id.clone());
                    }

                    debug!(
                        "Published {} ({}) to {}",
                        envelope.routing_key, envelope.correlation_id, self.config.exchange
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<LobbyEvent>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| ServiceError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    /// Get number of cached message IDs (for monitoring)
    pub fn cached_message_count(&self) -> usize {
        self.published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(&self, event: LobbyEvent) -> Result<()> {
        let envelope = MessageEnvelope::for_event(event);
        self.publish_envelope(&envelope).await
    }
}

/// Publisher that drops every event, used for dry runs
#[derive(Debug, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(&self, event: LobbyEvent) -> Result<()> {
        debug!(
            "Dry run: dropping {} for lobby #{}",
            event.name(),
            event.lobby_id()
        );
        Ok(())
    }
}

/// Mock event publisher for testing; records every event it accepts
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<LobbyEvent>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail without recording
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// All published events, oldest first
    pub fn events(&self) -> Vec<LobbyEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of all published events (for testing)
    pub fn get_published_events(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| event.name().to_string())
            .collect()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, event: LobbyEvent) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ServiceError::AmqpConnectionFailed {
                message: format!("refusing to publish {}", event.name()),
            }
            .into());
        }
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
