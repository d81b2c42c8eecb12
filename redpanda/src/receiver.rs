//! Step result receiver over a Kafka consumer group.

use crate::ledger::{PartitionLedger, lock_token, parse_lock_token};
use airlock_core::queue::{MessageReceiver, QueueError, QueueFuture, ReceivedMessage};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Header carrying the sender's correlation id, if any.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// [`MessageReceiver`] backed by a Redpanda consumer group.
///
/// Offsets are committed manually. Completing a message only marks it in a
/// ledger; the batch is settled when the next batch is requested:
///
/// ```text
/// partition 0:  10 ✓  11 ✗  12 ✓
///                      ▲
///                      commit 11, seek to 11
/// ```
///
/// Offset 11 is delivered again with a higher delivery count, offset 12 is
/// read again but skipped.
///
/// # Example
///
/// ```no_run
/// use airlock_redpanda::RedpandaMessageReceiver;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let receiver = RedpandaMessageReceiver::builder()
///     .brokers("localhost:9092")
///     .topic("airlock-step-result")
///     .consumer_group("airlock-status-update")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaMessageReceiver {
    consumer: StreamConsumer,
    topic: String,
    poll_timeout: Duration,
    ledger: Mutex<PartitionLedger>,
}

impl RedpandaMessageReceiver {
    /// Create a builder for configuring the receiver.
    #[must_use]
    pub fn builder() -> RedpandaMessageReceiverBuilder {
        RedpandaMessageReceiverBuilder::default()
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn ledger(&self) -> MutexGuard<'_, PartitionLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit what the previous batch completed and rewind to what it did not.
    fn settle_previous_batch(&self) {
        let settlements = self.ledger().settle();
        if settlements.is_empty() {
            return;
        }

        let mut offsets = TopicPartitionList::new();
        for settlement in &settlements {
            if let Err(e) = offsets.add_partition_offset(
                &self.topic,
                settlement.partition,
                Offset::Offset(settlement.commit_offset),
            ) {
                tracing::warn!(partition = settlement.partition, error = %e, "Invalid commit offset");
            }

            if settlement.rewind {
                if let Err(e) = self.consumer.seek(
                    &self.topic,
                    settlement.partition,
                    Offset::Offset(settlement.commit_offset),
                    Duration::from_secs(1),
                ) {
                    tracing::warn!(
                        topic = %self.topic,
                        partition = settlement.partition,
                        offset = settlement.commit_offset,
                        error = %e,
                        "Failed to rewind partition (uncompleted messages wait for the next rebalance)"
                    );
                }
            }
        }

        if let Err(e) = self.consumer.commit(&offsets, CommitMode::Async) {
            tracing::warn!(
                topic = %self.topic,
                error = %e,
                "Failed to commit offsets (completed messages may be redelivered)"
            );
        }
    }

    /// Turn a consumed record into a delivery, or `None` if it was already
    /// completed before a rewind.
    fn to_received(&self, message: &BorrowedMessage<'_>) -> Option<ReceivedMessage> {
        let partition = message.partition();
        let offset = message.offset();
        let delivery_count = self.ledger().record(partition, offset)?;

        let body = message
            .payload()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .unwrap_or_default();

        let correlation_id = message.headers().and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == CORRELATION_ID_HEADER)
                .and_then(|header| header.value)
                .map(|value| String::from_utf8_lossy(value).into_owned())
        });

        tracing::trace!(
            topic = message.topic(),
            partition = partition,
            offset = offset,
            delivery_count = delivery_count,
            "Received step result"
        );

        Some(ReceivedMessage {
            message_id: format!("{}/{partition}/{offset}", message.topic()),
            correlation_id,
            body,
            delivery_count,
            lock_token: lock_token(partition, offset),
        })
    }

    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.settle_previous_batch();

        let mut batch = Vec::with_capacity(max_messages);
        let mut deadline = Instant::now() + max_wait;

        while batch.len() < max_messages {
            let message = match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Err(_elapsed) => break,
                Ok(Ok(message)) => message,
                Ok(Err(e)) if batch.is_empty() => {
                    return Err(QueueError::ReceiveFailed(e.to_string()));
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Receive failed mid-batch, returning partial batch");
                    break;
                }
            };

            if let Some(received) = self.to_received(&message) {
                batch.push(received);
            }
            // Once something arrived, only linger briefly for the rest
            deadline = deadline.min(Instant::now() + self.poll_timeout);
        }

        Ok(batch)
    }
}

impl MessageReceiver for RedpandaMessageReceiver {
    fn receive_messages(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> QueueFuture<'_, Vec<ReceivedMessage>> {
        Box::pin(self.receive(max_messages, max_wait))
    }

    fn complete_message<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let (partition, offset) = parse_lock_token(&message.lock_token)
                .ok_or_else(|| QueueError::UnknownLockToken(message.lock_token.clone()))?;

            if self.ledger().complete(partition, offset) {
                Ok(())
            } else {
                Err(QueueError::UnknownLockToken(message.lock_token.clone()))
            }
        })
    }
}

/// Builder for configuring a [`RedpandaMessageReceiver`].
#[derive(Default)]
pub struct RedpandaMessageReceiverBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    poll_timeout: Option<Duration>,
}

impl RedpandaMessageReceiverBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the step result topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group ID.
    ///
    /// Default: `"airlock-status-update"`. Instances sharing a group share
    /// the partitions.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a new group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so step results published before the first
    /// deployment are not lost.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set how long a receive keeps filling a batch after the first message.
    ///
    /// Default: 100 milliseconds
    #[must_use]
    pub const fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = Some(poll_timeout);
        self
    }

    /// Build the receiver and subscribe to the topic.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if brokers or topic are not set,
    /// or the consumer cannot be created or subscribed.
    pub fn build(self) -> Result<RedpandaMessageReceiver, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| QueueError::ConnectionFailed("Topic not configured".to_string()))?;
        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| "airlock-status-update".to_string());
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to subscribe to {topic}: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            consumer_group = %consumer_group,
            auto_offset_reset = %auto_offset_reset,
            manual_commit = true,
            "Subscribed to step result topic"
        );

        Ok(RedpandaMessageReceiver {
            consumer,
            topic,
            poll_timeout: self.poll_timeout.unwrap_or(Duration::from_millis(100)),
            ledger: Mutex::new(PartitionLedger::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaMessageReceiver>();
        assert_sync::<RedpandaMessageReceiver>();
    }

    #[test]
    fn build_requires_brokers() {
        let result = RedpandaMessageReceiver::builder().topic("t").build();
        assert!(matches!(result, Err(QueueError::ConnectionFailed(reason)) if reason.contains("Brokers")));
    }

    #[test]
    fn build_requires_topic() {
        let result = RedpandaMessageReceiver::builder()
            .brokers("localhost:9092")
            .build();
        assert!(matches!(result, Err(QueueError::ConnectionFailed(reason)) if reason.contains("Topic")));
    }
}
