//! In-memory step result queue.
//!
//! Mirrors peek-lock semantics: a received message stays locked until it is
//! completed. Anything still locked when the next batch is requested counts
//! as an expired lock and goes back to the front of the queue with its
//! delivery count incremented on the next hand-out.
//!
//! [`InMemoryDeadLetterQueue`] collects what the processor gives up on.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use airlock_core::dead_letter::{DeadLetter, DeadLetterError, DeadLetterFuture, DeadLetterQueue};
use airlock_core::queue::{MessageReceiver, QueueError, QueueFuture, ReceivedMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Stored {
    sequence: u64,
    message_id: String,
    correlation_id: Option<String>,
    body: String,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<Stored>,
    locked: HashMap<String, Stored>,
    completed: Vec<ReceivedMessage>,
    receive_failure: Option<QueueError>,
    complete_failure: Option<QueueError>,
}

/// Queue double implementing [`MessageReceiver`].
///
/// # Example
///
/// ```
/// use airlock_testing::InMemoryMessageQueue;
/// use airlock_core::queue::MessageReceiver;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryMessageQueue::new();
/// queue.send("hello");
///
/// let batch = queue.receive_messages(10, Duration::from_millis(10)).await?;
/// queue.complete_message(&batch[0]).await?;
/// assert_eq!(queue.completed().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryMessageQueue {
    state: Arc<Mutex<QueueState>>,
    arrivals: Arc<Notify>,
}

impl InMemoryMessageQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a body and return its message id
    pub fn send(&self, body: impl Into<String>) -> String {
        self.send_with_correlation(body, None)
    }

    /// Enqueue a body with a correlation id
    pub fn send_with_correlation(
        &self,
        body: impl Into<String>,
        correlation_id: Option<String>,
    ) -> String {
        let message_id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let sequence = state.next_id;
            let message_id = format!("msg-{sequence}");
            state.ready.push_back(Stored {
                sequence,
                message_id: message_id.clone(),
                correlation_id,
                body: body.into(),
                delivery_count: 0,
            });
            message_id
        };
        self.arrivals.notify_one();
        message_id
    }

    /// Make the next receive calls fail until cleared
    pub fn fail_receives_with(&self, error: QueueError) {
        self.state.lock().unwrap().receive_failure = Some(error);
    }

    /// Make completions fail until cleared
    pub fn fail_completions_with(&self, error: QueueError) {
        self.state.lock().unwrap().complete_failure = Some(error);
    }

    /// Remove injected failures
    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.receive_failure = None;
        state.complete_failure = None;
    }

    /// Messages completed so far, in completion order
    #[must_use]
    pub fn completed(&self) -> Vec<ReceivedMessage> {
        self.state.lock().unwrap().completed.clone()
    }

    /// Ids of completed messages
    #[must_use]
    pub fn completed_ids(&self) -> Vec<String> {
        self.completed().into_iter().map(|m| m.message_id).collect()
    }

    /// Messages waiting for delivery (including expired locks not yet returned)
    #[must_use]
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ready.len() + state.locked.len()
    }

    /// Messages handed out and not yet settled
    #[must_use]
    pub fn locked(&self) -> usize {
        self.state.lock().unwrap().locked.len()
    }

    fn take_batch(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.receive_failure.clone() {
            return Err(error);
        }

        // Expire outstanding locks, oldest delivery first
        let mut expired: Vec<Stored> = state.locked.drain().map(|(_, stored)| stored).collect();
        expired.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        for stored in expired {
            state.ready.push_front(stored);
        }

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut stored) = state.ready.pop_front() else {
                break;
            };
            stored.delivery_count += 1;
            let lock_token = Uuid::new_v4().to_string();

            batch.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                correlation_id: stored.correlation_id.clone(),
                body: stored.body.clone(),
                delivery_count: stored.delivery_count,
                lock_token: lock_token.clone(),
            });
            state.locked.insert(lock_token, stored);
        }
        Ok(batch)
    }
}

impl MessageReceiver for InMemoryMessageQueue {
    fn receive_messages(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> QueueFuture<'_, Vec<ReceivedMessage>> {
        Box::pin(async move {
            let batch = self.take_batch(max_messages)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            // Nothing ready: wait for an arrival or the deadline, then try once more
            let _ = tokio::time::timeout(max_wait, self.arrivals.notified()).await;
            self.take_batch(max_messages)
        })
    }

    fn complete_message<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.complete_failure.clone() {
                return Err(error);
            }
            if state.locked.remove(&message.lock_token).is_none() {
                return Err(QueueError::UnknownLockToken(message.lock_token.clone()));
            }
            state.completed.push(message.clone());
            Ok(())
        })
    }
}

/// Dead-letter store double implementing [`DeadLetterQueue`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
    failure: Arc<Mutex<Option<DeadLetterError>>>,
}

impl InMemoryDeadLetterQueue {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes fail until cleared
    pub fn fail_with(&self, error: DeadLetterError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Remove the injected failure
    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Stored letters, oldest first
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }
}

impl DeadLetterQueue for InMemoryDeadLetterQueue {
    fn dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> DeadLetterFuture<'a> {
        Box::pin(async move {
            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }
            self.letters.lock().unwrap().push(letter.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uncompleted_messages_are_redelivered_with_higher_count() {
        let queue = InMemoryMessageQueue::new();
        let first = queue.send("a");
        let second = queue.send("b");

        let batch = queue.receive_messages(10, Duration::from_millis(5)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|m| m.delivery_count == 1));

        // Complete only the second one
        queue.complete_message(&batch[1]).await.unwrap();

        let redelivered = queue.receive_messages(10, Duration::from_millis(5)).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message_id, first);
        assert_eq!(redelivered[0].delivery_count, 2);
        assert_eq!(queue.completed_ids(), vec![second]);
    }

    #[tokio::test]
    async fn stale_lock_token_cannot_complete() {
        let queue = InMemoryMessageQueue::new();
        queue.send("a");

        let batch = queue.receive_messages(1, Duration::from_millis(5)).await.unwrap();
        // Second receive expires the first lock
        let _ = queue.receive_messages(1, Duration::from_millis(5)).await.unwrap();

        assert!(matches!(
            queue.complete_message(&batch[0]).await,
            Err(QueueError::UnknownLockToken(_))
        ));
    }

    #[tokio::test]
    async fn empty_queue_returns_empty_batch_after_wait() {
        let queue = InMemoryMessageQueue::new();
        let batch = queue.receive_messages(5, Duration::from_millis(5)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn respects_batch_size() {
        let queue = InMemoryMessageQueue::new();
        for i in 0..5 {
            queue.send(format!("m{i}"));
        }
        let batch = queue.receive_messages(3, Duration::from_millis(5)).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].body, "m0");
    }

    #[tokio::test]
    async fn dead_letter_store_records_until_failing() {
        let dead_letters = InMemoryDeadLetterQueue::new();
        let letter = DeadLetter {
            message_id: "msg-1".to_string(),
            correlation_id: None,
            body: "bad".to_string(),
            delivery_count: 3,
            error_kind: "malformed",
            error_message: "format incorrect".to_string(),
        };

        dead_letters.dead_letter(&letter).await.unwrap();
        dead_letters.fail_with(DeadLetterError::Unavailable("down".to_string()));
        assert!(dead_letters.dead_letter(&letter).await.is_err());

        assert_eq!(dead_letters.letters(), vec![letter]);
    }
}
