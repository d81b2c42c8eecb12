//! The step result processing loop.
//!
//! For every message in a batch:
//!
//! ```text
//! decode ──✗──► report, complete
//!   │
//! get_by_id ──not found──► report, complete
//!   │       └─other──────► report, abandon
//!   │
//! status == completed step? ──✗──► report, abandon
//!   │
//! validate new_status ──✗──► report, complete
//!   │
//! update_status ──✗──► report, complete/abandon (per repository error)
//!   │
//! publish × 2 (best-effort), complete
//! ```
//!
//! Nothing is written unless every check passes, so abandoning a message is
//! always safe: the redelivered copy runs the same checks from scratch.
//!
//! An abandon on the `max_delivery_count`-th delivery becomes a dead letter
//! instead: the message is written to the [`DeadLetterQueue`] and completed.

use crate::metrics::StatusUpdateMetrics;
use airlock_core::dead_letter::{DeadLetter, DeadLetterQueue, TracingDeadLetterQueue};
use airlock_core::error::{Disposition, ProcessingError};
use airlock_core::message::StepResultMessage;
use airlock_core::publisher::{EventPublisher, status_update_events};
use airlock_core::queue::{MessageReceiver, QueueError, ReceivedMessage};
use airlock_core::reporting::ErrorReporter;
use airlock_core::repository::{AirlockRequestRepository, RepositoryError};
use airlock_core::request::{AirlockRequest, AirlockRequestStatus};
use airlock_core::transition::{required_status_for_step, validate_transition};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Deliveries after which a message that is still failing is dead-lettered.
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

/// Result of processing one message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageOutcome {
    /// Whether the message should be acknowledged
    pub disposition: Disposition,
    /// The failure, if processing did not apply the update
    pub error: Option<ProcessingError>,
    /// The message was moved to the dead-letter queue
    pub dead_lettered: bool,
}

impl MessageOutcome {
    /// `true` when the update was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        self.error.is_none()
    }
}

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Messages in the batch
    pub received: usize,
    /// Messages whose status update was applied
    pub applied: usize,
    /// Messages acknowledged
    pub completed: usize,
    /// Messages left for redelivery
    pub abandoned: usize,
    /// Messages dead-lettered and then completed (also counted in `completed`)
    pub dead_lettered: usize,
    /// Acknowledgments the transport rejected
    pub failed_completions: usize,
}

/// Applies step result messages to airlock requests.
///
/// Collaborators are injected once and shared across batches.
///
/// # Example
///
/// ```rust,ignore
/// let processor = StatusUpdateProcessor::new(repository, publisher, Arc::new(TracingErrorReporter))
///     .with_max_concurrency(4)
///     .with_dead_letter_queue(Arc::new(dead_letters), 10);
///
/// let summary = processor
///     .receive_and_process(&receiver, 10, Duration::from_secs(5))
///     .await?;
/// ```
#[derive(Clone)]
pub struct StatusUpdateProcessor {
    repository: Arc<dyn AirlockRequestRepository>,
    publisher: Arc<dyn EventPublisher>,
    reporter: Arc<dyn ErrorReporter>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    max_delivery_count: u32,
    max_concurrency: usize,
}

impl StatusUpdateProcessor {
    /// Create a processor that handles one message at a time.
    ///
    /// Dead letters go to [`TracingDeadLetterQueue`] after
    /// [`DEFAULT_MAX_DELIVERY_COUNT`] deliveries until
    /// [`with_dead_letter_queue`](Self::with_dead_letter_queue) says otherwise.
    #[must_use]
    pub fn new(
        repository: Arc<dyn AirlockRequestRepository>,
        publisher: Arc<dyn EventPublisher>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            repository,
            publisher,
            reporter,
            dead_letters: Arc::new(TracingDeadLetterQueue),
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
            max_concurrency: 1,
        }
    }

    /// Dead-letter a message instead of abandoning it once it has been
    /// delivered `max_delivery_count` times (minimum 1).
    #[must_use]
    pub fn with_dead_letter_queue(
        mut self,
        dead_letters: Arc<dyn DeadLetterQueue>,
        max_delivery_count: u32,
    ) -> Self {
        self.dead_letters = dead_letters;
        self.max_delivery_count = max_delivery_count.max(1);
        self
    }

    /// Configured delivery limit.
    #[must_use]
    pub const fn max_delivery_count(&self) -> u32 {
        self.max_delivery_count
    }

    /// Process up to `max_concurrency` messages of a batch at once (minimum 1).
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Configured concurrency.
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every check and, if they pass, apply the update and publish.
    ///
    /// Does not report or acknowledge anything; see [`process_message`](Self::process_message).
    ///
    /// # Errors
    ///
    /// Returns the [`ProcessingError`] of the first check that failed.
    pub async fn process_body(&self, body: &str) -> Result<AirlockRequest, ProcessingError> {
        let message = StepResultMessage::decode(body)?;
        let data = &message.data;

        let request = match self.repository.get_by_id(&data.request_id).await {
            Ok(request) => request,
            Err(RepositoryError::NotFound(_)) => {
                return Err(ProcessingError::RequestNotFound {
                    request_id: data.request_id.clone(),
                });
            }
            Err(e) => return Err(ProcessingError::state_store_unavailable(e.to_string())),
        };

        if request.status != required_status_for_step(data.completed_step) {
            return Err(ProcessingError::StatusMismatch {
                request_id: data.request_id.clone(),
                completed_step: data.completed_step.as_str().to_string(),
                current_status: request.status,
            });
        }

        let new_status = validate_transition(request.status, &data.new_status).map_err(|reason| {
            ProcessingError::InvalidStatus {
                request_id: data.request_id.clone(),
                completed_step: data.completed_step.as_str().to_string(),
                new_status: data.new_status.clone(),
                reason,
            }
        })?;

        let previous_status = request.status;
        let updated = self
            .repository
            .update_status(&request, new_status, &request.user)
            .await
            .map_err(|source| ProcessingError::UpdateFailed {
                request_id: data.request_id.clone(),
                source,
            })?;

        tracing::info!(
            request_id = %updated.id,
            previous_status = previous_status.as_str(),
            new_status = updated.status.as_str(),
            event_id = %message.id,
            "Airlock request status updated"
        );
        StatusUpdateMetrics::record_status_update(updated.status);

        self.publish_status_update(previous_status, &updated).await;
        Ok(updated)
    }

    /// Process one received message: run the checks, report a failure once,
    /// and decide the disposition.
    pub async fn process_message(&self, message: &ReceivedMessage) -> MessageOutcome {
        let started = Instant::now();
        let span = tracing::info_span!(
            "step_result",
            message_id = %message.message_id,
            delivery_count = message.delivery_count,
        );

        let outcome = match self.process_body(&message.body).instrument(span).await {
            Ok(_) => MessageOutcome {
                disposition: Disposition::Complete,
                error: None,
                dead_lettered: false,
            },
            Err(error) => {
                self.reporter.report(&error.to_string());
                let dead_lettered = error.disposition() == Disposition::Abandon
                    && message.delivery_count >= self.max_delivery_count
                    && self.dead_letter(message, &error).await;
                MessageOutcome {
                    disposition: if dead_lettered {
                        Disposition::Complete
                    } else {
                        error.disposition()
                    },
                    error: Some(error),
                    dead_lettered,
                }
            }
        };

        let kind = outcome.error.as_ref().map_or("applied", ProcessingError::kind);
        StatusUpdateMetrics::record_outcome(kind, started.elapsed());
        outcome
    }

    /// Pull one batch and process it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] only if the batch could not be received. Per-message
    /// failures are reported and settled, never returned.
    pub async fn receive_and_process(
        &self,
        receiver: &dyn MessageReceiver,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<BatchSummary, QueueError> {
        let batch = receiver.receive_messages(max_messages, max_wait).await?;
        Ok(self.process_batch(receiver, &batch).await)
    }

    /// Process an already received batch, acknowledging each message as soon
    /// as its outcome is known.
    ///
    /// One message failing never stops its siblings.
    pub async fn process_batch(
        &self,
        receiver: &dyn MessageReceiver,
        batch: &[ReceivedMessage],
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            received: batch.len(),
            ..BatchSummary::default()
        };
        if batch.is_empty() {
            return summary;
        }
        StatusUpdateMetrics::record_batch(batch.len());

        let mut waiting = batch.iter();
        let mut in_flight = FuturesUnordered::new();
        for message in waiting.by_ref().take(self.max_concurrency) {
            in_flight.push(self.settle(receiver, message));
        }

        while let Some(settled) = in_flight.next().await {
            if settled.applied {
                summary.applied += 1;
            }
            match settled.disposition {
                Disposition::Complete if settled.completion_failed => {
                    summary.failed_completions += 1;
                }
                Disposition::Complete => summary.completed += 1,
                Disposition::Abandon => summary.abandoned += 1,
            }
            if settled.dead_lettered {
                summary.dead_lettered += 1;
            }

            if let Some(message) = waiting.next() {
                in_flight.push(self.settle(receiver, message));
            }
        }

        tracing::debug!(
            received = summary.received,
            applied = summary.applied,
            completed = summary.completed,
            abandoned = summary.abandoned,
            dead_lettered = summary.dead_lettered,
            failed_completions = summary.failed_completions,
            "Batch processed"
        );
        summary
    }

    async fn settle(&self, receiver: &dyn MessageReceiver, message: &ReceivedMessage) -> Settled {
        let outcome = self.process_message(message).await;
        let mut completion_failed = false;

        match outcome.disposition {
            Disposition::Complete => {
                if let Err(e) = receiver.complete_message(message).await {
                    completion_failed = true;
                    StatusUpdateMetrics::record_complete_error();
                    tracing::warn!(
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to complete message (it may be redelivered)"
                    );
                } else {
                    StatusUpdateMetrics::record_completed();
                }
            }
            Disposition::Abandon => {
                StatusUpdateMetrics::record_abandoned();
                tracing::debug!(
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    "Message left for redelivery"
                );
            }
        }

        Settled {
            disposition: outcome.disposition,
            applied: outcome.is_applied(),
            dead_lettered: outcome.dead_lettered,
            completion_failed,
        }
    }

    async fn dead_letter(&self, message: &ReceivedMessage, error: &ProcessingError) -> bool {
        let letter = DeadLetter::new(message, error);
        match self.dead_letters.dead_letter(&letter).await {
            Ok(()) => {
                StatusUpdateMetrics::record_dead_lettered(letter.error_kind);
                tracing::warn!(
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    kind = letter.error_kind,
                    "Delivery limit reached, message dead-lettered"
                );
                true
            }
            Err(e) => {
                StatusUpdateMetrics::record_dead_letter_error();
                tracing::warn!(
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    error = %e,
                    "Failed to dead-letter message, leaving it for redelivery"
                );
                false
            }
        }
    }

    async fn publish_status_update(&self, previous_status: AirlockRequestStatus, updated: &AirlockRequest) {
        for event in status_update_events(previous_status, updated) {
            match self.publisher.publish(&event).await {
                Ok(()) => StatusUpdateMetrics::record_publish(event.topic()),
                Err(e) => {
                    StatusUpdateMetrics::record_publish_error(event.topic());
                    tracing::warn!(
                        request_id = %updated.id,
                        topic = event.topic(),
                        error = %e,
                        "Failed to publish airlock event"
                    );
                }
            }
        }
    }
}

struct Settled {
    disposition: Disposition,
    applied: bool,
    dead_lettered: bool,
    completion_failed: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use airlock_core::publisher::PublishError;
    use airlock_testing::fixtures::{AIRLOCK_REQUEST_ID, sample_airlock_request, step_result_body};
    use airlock_testing::{
        InMemoryAirlockRequestRepository, InMemoryMessageQueue, RecordingErrorReporter,
        RecordingEventPublisher,
    };

    struct Harness {
        repository: InMemoryAirlockRequestRepository,
        publisher: RecordingEventPublisher,
        reporter: RecordingErrorReporter,
        processor: StatusUpdateProcessor,
    }

    fn harness() -> Harness {
        let repository = InMemoryAirlockRequestRepository::new();
        let publisher = RecordingEventPublisher::new();
        let reporter = RecordingErrorReporter::new();
        let processor = StatusUpdateProcessor::new(
            Arc::new(repository.clone()),
            Arc::new(publisher.clone()),
            Arc::new(reporter.clone()),
        );
        Harness {
            repository,
            publisher,
            reporter,
            processor,
        }
    }

    #[tokio::test]
    async fn process_body_returns_updated_request() {
        let h = harness();
        h.repository
            .insert(sample_airlock_request(AirlockRequestStatus::Submitted));

        let updated = h
            .processor
            .process_body(&step_result_body("submitted", "in_review", AIRLOCK_REQUEST_ID))
            .await
            .unwrap();

        assert_eq!(updated.status, AirlockRequestStatus::InReview);
        // process_body itself never reports
        assert_eq!(h.reporter.count(), 0);
    }

    #[tokio::test]
    async fn publish_failure_does_not_change_disposition() {
        let h = harness();
        h.repository
            .insert(sample_airlock_request(AirlockRequestStatus::Submitted));
        h.publisher.fail_with(PublishError::PublishFailed {
            topic: "airlock-status-changed".to_string(),
            reason: "broker down".to_string(),
        });

        let queue = InMemoryMessageQueue::new();
        queue.send(step_result_body("submitted", "in_review", AIRLOCK_REQUEST_ID));
        let summary = h
            .processor
            .receive_and_process(&queue, 10, Duration::from_millis(5))
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.applied, 1);
        // Both publishes were still attempted
        assert_eq!(h.publisher.publish_calls(), 2);
        assert_eq!(h.reporter.count(), 0);
    }

    #[tokio::test]
    async fn failed_completion_is_counted_not_fatal() {
        let h = harness();
        let queue = InMemoryMessageQueue::new();
        queue.send("bad");
        queue.send("also bad");
        queue.fail_completions_with(QueueError::CompleteFailed {
            message_id: "msg-1".to_string(),
            reason: "lock lost".to_string(),
        });

        let summary = h
            .processor
            .receive_and_process(&queue, 10, Duration::from_millis(5))
            .await
            .unwrap();

        assert_eq!(summary.received, 2);
        assert_eq!(summary.failed_completions, 2);
        assert_eq!(summary.completed, 0);
        assert_eq!(h.reporter.count(), 2);
    }

    #[tokio::test]
    async fn concurrency_is_at_least_one() {
        let h = harness();
        assert_eq!(h.processor.with_max_concurrency(0).max_concurrency(), 1);
    }

    #[tokio::test]
    async fn receive_failure_is_returned() {
        let h = harness();
        let queue = InMemoryMessageQueue::new();
        queue.fail_receives_with(QueueError::ReceiveFailed("network".to_string()));

        let result = h
            .processor
            .receive_and_process(&queue, 10, Duration::from_millis(5))
            .await;
        assert_eq!(result, Err(QueueError::ReceiveFailed("network".to_string())));
    }
}
