//! Parking place for messages that keep failing.
//!
//! A message that would be abandoned again after reaching the configured
//! delivery limit is handed to a [`DeadLetterQueue`] instead, then completed.
//! The message is acknowledged only once the dead-letter write succeeds.

use crate::error::ProcessingError;
use crate::queue::ReceivedMessage;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Log target for dead-lettered messages.
pub const DEAD_LETTER_TARGET: &str = "airlock::dead_letter";

/// Errors from a dead-letter store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterError {
    /// The store could not accept the entry
    #[error("Dead letter store unavailable: {0}")]
    Unavailable(String),
}

/// A message given up on, with the failure of its last delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Transport-assigned message id
    pub message_id: String,
    /// Correlation id, if the sender set one
    pub correlation_id: Option<String>,
    /// Raw body text
    pub body: String,
    /// Deliveries attempted, including the last one
    pub delivery_count: u32,
    /// Metrics label of the last failure
    pub error_kind: &'static str,
    /// Operator line of the last failure
    pub error_message: String,
}

impl DeadLetter {
    /// Capture `message` and the failure of its latest delivery.
    #[must_use]
    pub fn new(message: &ReceivedMessage, error: &ProcessingError) -> Self {
        Self {
            message_id: message.message_id.clone(),
            correlation_id: message.correlation_id.clone(),
            body: message.body.clone(),
            delivery_count: message.delivery_count,
            error_kind: error.kind(),
            error_message: error.to_string(),
        }
    }
}

/// Boxed future returned by [`DeadLetterQueue::dead_letter`].
pub type DeadLetterFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + 'a>>;

/// Durable store for messages that exhausted their deliveries.
pub trait DeadLetterQueue: Send + Sync {
    /// Store `letter`.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Unavailable`] if nothing was stored. The
    /// caller then leaves the message for redelivery.
    fn dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> DeadLetterFuture<'a>;
}

/// Writes dead letters to `tracing` at warn level, body included.
///
/// Used when no durable store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDeadLetterQueue;

impl DeadLetterQueue for TracingDeadLetterQueue {
    fn dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> DeadLetterFuture<'a> {
        tracing::warn!(
            target: DEAD_LETTER_TARGET,
            message_id = %letter.message_id,
            correlation_id = letter.correlation_id.as_deref(),
            delivery_count = letter.delivery_count,
            error_kind = letter.error_kind,
            error = %letter.error_message,
            body = %letter.body,
            "Message dead-lettered"
        );
        Box::pin(async { Ok(()) })
    }
}
