//! Long-running step result consumer.
//!
//! Wraps a [`StatusUpdateProcessor`] in a receive-process loop:
//!
//! ```text
//! loop {
//!     select! {
//!         shutdown           => exit
//!         receive batch      => process batch to completion,
//!                               wait redelivery_delay if anything was abandoned
//!         receive failed     => log, wait retry_delay
//!     }
//! }
//! ```
//!
//! The queue hands an abandoned message straight back, so the redelivery
//! delay is what spaces out retries of a message that keeps failing.
//!
//! Only waiting for a batch is interruptible. Once a batch is in hand it is
//! processed and settled before the shutdown signal is looked at again, so an
//! applied update is never left unacknowledged by a shutdown.

use crate::processor::{BatchSummary, StatusUpdateProcessor};
use airlock_core::queue::MessageReceiver;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Errors when building a consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// A required builder field was not set
    #[error("{0} is required")]
    MissingField(&'static str),
}

/// Totals across the lifetime of a consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Batches processed (empty batches excluded)
    pub batches: usize,
    /// Sum of all batch summaries
    pub totals: BatchSummary,
    /// Receive calls that failed
    pub receive_failures: usize,
}

impl ConsumerStats {
    fn add(&mut self, summary: &BatchSummary) {
        if summary.received > 0 {
            self.batches += 1;
        }
        self.totals.received += summary.received;
        self.totals.applied += summary.applied;
        self.totals.completed += summary.completed;
        self.totals.abandoned += summary.abandoned;
        self.totals.dead_lettered += summary.dead_lettered;
        self.totals.failed_completions += summary.failed_completions;
    }
}

/// Step result consumer.
///
/// # Lifecycle
///
/// 1. Created via [`builder()`](Self::builder)
/// 2. Spawned as background task via [`spawn()`](Self::spawn)
/// 3. Runs until the shutdown signal is received or its sender is dropped
///
/// # Configuration
///
/// - `name`: consumer name (for logging)
/// - `receiver`: queue to pull batches from
/// - `processor`: message processor
/// - `shutdown`: broadcast receiver for graceful shutdown coordination
/// - `batch_size`: messages per batch (default: 10)
/// - `max_wait`: how long one receive may wait (default: 5s)
/// - `retry_delay`: wait after a failed receive (default: 5s)
/// - `redelivery_delay`: wait after a batch that abandoned messages (default: 5s)
pub struct StatusUpdateConsumer {
    name: String,
    receiver: Arc<dyn MessageReceiver>,
    processor: StatusUpdateProcessor,
    shutdown: broadcast::Receiver<()>,
    batch_size: usize,
    max_wait: Duration,
    retry_delay: Duration,
    redelivery_delay: Duration,
}

impl StatusUpdateConsumer {
    /// Create a builder for configuring a consumer.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let consumer = StatusUpdateConsumer::builder()
    ///     .name("airlock-status-update")
    ///     .receiver(receiver)
    ///     .processor(processor)
    ///     .shutdown(shutdown_rx)
    ///     .batch_size(20)
    ///     .build()?;
    ///
    /// let handle = consumer.spawn();
    /// ```
    #[must_use]
    pub fn builder() -> StatusUpdateConsumerBuilder {
        StatusUpdateConsumerBuilder::default()
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task resolves to the lifetime totals once shutdown completes.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<ConsumerStats> {
        tokio::spawn(self.run())
    }

    /// Run the loop on the current task until shutdown.
    pub async fn run(mut self) -> ConsumerStats {
        info!(
            consumer = %self.name,
            batch_size = self.batch_size,
            max_concurrency = self.processor.max_concurrency(),
            "Status update consumer started"
        );
        let mut stats = ConsumerStats::default();

        loop {
            let received = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Status update consumer received shutdown signal");
                    break;
                }
                received = self.receiver.receive_messages(self.batch_size, self.max_wait) => received,
            };

            match received {
                Ok(batch) if batch.is_empty() => {
                    debug!(consumer = %self.name, "No messages received");
                }
                Ok(batch) => {
                    let summary = self.processor.process_batch(self.receiver.as_ref(), &batch).await;
                    stats.add(&summary);
                    if summary.abandoned > 0 {
                        debug!(
                            consumer = %self.name,
                            abandoned = summary.abandoned,
                            "Waiting {:?} before redelivery",
                            self.redelivery_delay
                        );
                        tokio::select! {
                            _ = self.shutdown.recv() => break,
                            () = tokio::time::sleep(self.redelivery_delay) => {}
                        }
                    }
                }
                Err(e) => {
                    stats.receive_failures += 1;
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to receive step result messages, retrying in {:?}",
                        self.retry_delay
                    );
                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!(
            consumer = %self.name,
            batches = stats.batches,
            received = stats.totals.received,
            completed = stats.totals.completed,
            abandoned = stats.totals.abandoned,
            dead_lettered = stats.totals.dead_lettered,
            "Status update consumer stopped"
        );
        stats
    }
}

/// Builder for configuring a [`StatusUpdateConsumer`].
#[derive(Default)]
pub struct StatusUpdateConsumerBuilder {
    name: Option<String>,
    receiver: Option<Arc<dyn MessageReceiver>>,
    processor: Option<StatusUpdateProcessor>,
    shutdown: Option<broadcast::Receiver<()>>,
    batch_size: Option<usize>,
    max_wait: Option<Duration>,
    retry_delay: Option<Duration>,
    redelivery_delay: Option<Duration>,
}

impl StatusUpdateConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the queue to consume from.
    #[must_use]
    pub fn receiver(mut self, receiver: Arc<dyn MessageReceiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Set the message processor.
    #[must_use]
    pub fn processor(mut self, processor: StatusUpdateProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set messages per batch (default: 10, minimum 1).
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }

    /// Set how long one receive may wait (default: 5 seconds).
    #[must_use]
    pub const fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Set custom retry delay (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set the wait after a batch that abandoned messages (default: 5 seconds).
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MissingField`] if `receiver`, `processor` or
    /// `shutdown` was not set.
    pub fn build(self) -> Result<StatusUpdateConsumer, ConsumerError> {
        Ok(StatusUpdateConsumer {
            name: self
                .name
                .unwrap_or_else(|| "airlock-status-update".to_string()),
            receiver: self.receiver.ok_or(ConsumerError::MissingField("receiver"))?,
            processor: self.processor.ok_or(ConsumerError::MissingField("processor"))?,
            shutdown: self.shutdown.ok_or(ConsumerError::MissingField("shutdown"))?,
            batch_size: self.batch_size.unwrap_or(10),
            max_wait: self.max_wait.unwrap_or(Duration::from_secs(5)),
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(5)),
            redelivery_delay: self.redelivery_delay.unwrap_or(Duration::from_secs(5)),
        })
    }
}
