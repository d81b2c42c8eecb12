//! Inbound step result queue.
//!
//! The queue hands out messages in batches and forgets a message only once it
//! is completed. A message that is never completed is delivered again later,
//! with a higher [`ReceivedMessage::delivery_count`]. That redelivery is the
//! only retry mechanism the processor relies on.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors from the queue transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Could not connect or subscribe
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Receiving a batch failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Completing (acknowledging) a message failed
    #[error("Failed to complete message {message_id}: {reason}")]
    CompleteFailed {
        /// Message that could not be completed
        message_id: String,
        /// Transport error
        reason: String,
    },

    /// The lock token is unknown to this receiver
    #[error("Unknown lock token: {0}")]
    UnknownLockToken(String),
}

/// A message pulled from the queue and not yet settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Transport-assigned message id
    pub message_id: String,
    /// Correlation id, if the sender set one
    pub correlation_id: Option<String>,
    /// Raw body text
    pub body: String,
    /// How many times this message has been handed out, starting at 1
    pub delivery_count: u32,
    /// Opaque handle the receiver uses to settle this delivery
    pub lock_token: String,
}

/// Boxed future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Batch receive plus acknowledgment.
pub trait MessageReceiver: Send + Sync {
    /// Wait up to `max_wait` for at most `max_messages` messages.
    ///
    /// An empty batch is a normal result.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ReceiveFailed`] if the transport fails.
    fn receive_messages(&self, max_messages: usize, max_wait: Duration)
    -> QueueFuture<'_, Vec<ReceivedMessage>>;

    /// Acknowledge `message` so it is never delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::CompleteFailed`] or [`QueueError::UnknownLockToken`].
    fn complete_message<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()>;
}
