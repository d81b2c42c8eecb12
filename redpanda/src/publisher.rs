//! Airlock event publisher over a Kafka producer.

use airlock_core::publisher::{AirlockEvent, EventPublisher, PublishError};
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Header carrying [`AirlockEvent::event_type`].
pub const EVENT_TYPE_HEADER: &str = "event-type";

/// [`EventPublisher`] backed by Redpanda.
///
/// Each event is sent as JSON to `{topic_prefix}{event.topic()}`, keyed by the
/// request id so all events of one request land on one partition in order.
///
/// # Example
///
/// ```no_run
/// use airlock_redpanda::RedpandaEventPublisher;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let publisher = RedpandaEventPublisher::builder()
///     .brokers("localhost:9092")
///     .producer_acks("all")
///     .topic_prefix("tre-")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventPublisher {
    producer: FutureProducer,
    timeout: Duration,
    topic_prefix: String,
}

impl RedpandaEventPublisher {
    /// Create a publisher with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::PublishFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, PublishError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the publisher.
    #[must_use]
    pub fn builder() -> RedpandaEventPublisherBuilder {
        RedpandaEventPublisherBuilder::default()
    }

    /// Destination topic of `event`.
    #[must_use]
    pub fn topic_for(&self, event: &AirlockEvent) -> String {
        format!("{}{}", self.topic_prefix, event.topic())
    }
}

impl EventPublisher for RedpandaEventPublisher {
    fn publish<'a>(
        &'a self,
        event: &'a AirlockEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>> {
        Box::pin(async move {
            let topic = self.topic_for(event);
            let payload = event.to_json()?;

            let record = FutureRecord::to(&topic)
                .payload(&payload)
                .key(event.request_id())
                .headers(OwnedHeaders::new().insert(Header {
                    key: EVENT_TYPE_HEADER,
                    value: Some(event.event_type()),
                }));

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        event_type = event.event_type(),
                        request_id = %event.request_id(),
                        "Airlock event published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => Err(PublishError::PublishFailed {
                    topic,
                    reason: kafka_error.to_string(),
                }),
            }
        })
    }
}

/// Builder for configuring a [`RedpandaEventPublisher`].
#[derive(Default)]
pub struct RedpandaEventPublisherBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    topic_prefix: Option<String>,
}

impl RedpandaEventPublisherBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Prepend `prefix` to every event topic.
    ///
    /// Default: none
    #[must_use]
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = Some(prefix.into());
        self
    }

    /// Build the publisher.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::PublishFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventPublisher, PublishError> {
        let brokers = self.brokers.ok_or_else(|| PublishError::PublishFailed {
            topic: String::new(),
            reason: "Brokers not configured".to_string(),
        })?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .create()
            .map_err(|e| PublishError::PublishFailed {
                topic: String::new(),
                reason: format!("Failed to create producer: {e}"),
            })?;

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            topic_prefix = self.topic_prefix.as_deref().unwrap_or(""),
            "Airlock event publisher created"
        );

        Ok(RedpandaEventPublisher {
            producer,
            timeout,
            topic_prefix: self.topic_prefix.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use airlock_core::publisher::{NOTIFICATION_TOPIC, STATUS_CHANGED_TOPIC, status_update_events};
    use airlock_core::request::AirlockRequestStatus;
    use airlock_testing::fixtures::sample_airlock_request;

    #[test]
    fn publisher_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventPublisher>();
        assert_sync::<RedpandaEventPublisher>();
    }

    #[test]
    fn build_requires_brokers() {
        assert!(RedpandaEventPublisher::builder().build().is_err());
    }

    #[test]
    fn topics_carry_the_prefix() {
        // Creating a producer does not contact the brokers
        let publisher = RedpandaEventPublisher::builder()
            .brokers("localhost:1")
            .topic_prefix("tre-")
            .build()
            .unwrap();
        let updated = sample_airlock_request(AirlockRequestStatus::InReview);
        let [status_changed, notification] =
            status_update_events(AirlockRequestStatus::Submitted, &updated);

        assert_eq!(
            publisher.topic_for(&status_changed),
            format!("tre-{STATUS_CHANGED_TOPIC}")
        );
        assert_eq!(
            publisher.topic_for(&notification),
            format!("tre-{NOTIFICATION_TOPIC}")
        );
    }
}
