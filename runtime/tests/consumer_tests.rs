//! Consumer loop lifecycle tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use airlock_core::queue::QueueError;
use airlock_core::request::AirlockRequestStatus;
use airlock_runtime::{ConsumerError, StatusUpdateConsumer, StatusUpdateProcessor};
use airlock_testing::fixtures::{AIRLOCK_REQUEST_ID, sample_airlock_request, step_result_body};
use airlock_testing::{
    InMemoryAirlockRequestRepository, InMemoryDeadLetterQueue, InMemoryMessageQueue,
    RecordingErrorReporter, RecordingEventPublisher,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn processor(repository: &InMemoryAirlockRequestRepository) -> StatusUpdateProcessor {
    StatusUpdateProcessor::new(
        Arc::new(repository.clone()),
        Arc::new(RecordingEventPublisher::new()),
        Arc::new(RecordingErrorReporter::new()),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn consumer_processes_messages_until_shutdown() {
    let repository = InMemoryAirlockRequestRepository::new();
    repository.insert(sample_airlock_request(AirlockRequestStatus::Submitted));
    let queue = InMemoryMessageQueue::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = StatusUpdateConsumer::builder()
        .name("test-consumer")
        .receiver(Arc::new(queue.clone()))
        .processor(processor(&repository))
        .shutdown(shutdown_rx)
        .max_wait(Duration::from_millis(10))
        .build()
        .unwrap()
        .spawn();

    queue.send(step_result_body("submitted", "in_review", AIRLOCK_REQUEST_ID));
    queue.send("bad");

    wait_until(|| queue.completed().len() == 2).await;
    shutdown_tx.send(()).unwrap();
    let stats = handle.await.unwrap();

    assert_eq!(stats.totals.received, 2);
    assert_eq!(stats.totals.applied, 1);
    assert_eq!(stats.totals.completed, 2);
    assert_eq!(
        repository.get(AIRLOCK_REQUEST_ID).unwrap().status,
        AirlockRequestStatus::InReview
    );
}

#[tokio::test]
async fn consumer_survives_receive_failures() {
    let repository = InMemoryAirlockRequestRepository::new();
    let queue = InMemoryMessageQueue::new();
    queue.fail_receives_with(QueueError::ReceiveFailed("broker unavailable".to_string()));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = StatusUpdateConsumer::builder()
        .receiver(Arc::new(queue.clone()))
        .processor(processor(&repository))
        .shutdown(shutdown_rx)
        .max_wait(Duration::from_millis(5))
        .retry_delay(Duration::from_millis(5))
        .build()
        .unwrap()
        .spawn();

    tokio::time::sleep(Duration::from_millis(30)).await;
    queue.clear_failures();
    queue.send("bad");

    wait_until(|| queue.completed().len() == 1).await;
    shutdown_tx.send(()).unwrap();
    let stats = handle.await.unwrap();

    assert!(stats.receive_failures >= 1);
    assert_eq!(stats.totals.completed, 1);
}

#[tokio::test]
async fn consumer_stops_when_shutdown_sender_is_dropped() {
    let repository = InMemoryAirlockRequestRepository::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let handle = StatusUpdateConsumer::builder()
        .receiver(Arc::new(InMemoryMessageQueue::new()))
        .processor(processor(&repository))
        .shutdown(shutdown_rx)
        .max_wait(Duration::from_secs(60))
        .build()
        .unwrap()
        .spawn();

    drop(shutdown_tx);
    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("consumer should stop promptly")
        .unwrap();
    assert_eq!(stats.batches, 0);
}

#[tokio::test]
async fn abandoned_message_is_retried_after_redelivery_delay() {
    // Already past the step the message reports, so every delivery is abandoned
    let repository = InMemoryAirlockRequestRepository::new();
    repository.insert(sample_airlock_request(AirlockRequestStatus::InReview));
    let queue = InMemoryMessageQueue::new();
    queue.send(step_result_body("submitted", "in_review", AIRLOCK_REQUEST_ID));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = StatusUpdateConsumer::builder()
        .receiver(Arc::new(queue.clone()))
        .processor(processor(&repository))
        .shutdown(shutdown_rx)
        .max_wait(Duration::from_millis(5))
        .redelivery_delay(Duration::from_millis(50))
        .build()
        .unwrap()
        .spawn();

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(()).unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("shutdown interrupts the redelivery delay")
        .unwrap();

    assert!(stats.batches >= 2, "batches: {}", stats.batches);
    assert!(stats.batches <= 6, "batches: {}", stats.batches);
    assert_eq!(stats.totals.abandoned, stats.batches);
    assert_eq!(repository.lookups().len(), stats.batches);
    assert_eq!(queue.outstanding(), 1);
}

#[tokio::test]
async fn message_stuck_past_delivery_limit_is_dead_lettered_and_completed() {
    let repository = InMemoryAirlockRequestRepository::new();
    repository.insert(sample_airlock_request(AirlockRequestStatus::InReview));
    let queue = InMemoryMessageQueue::new();
    let message_id = queue.send(step_result_body("submitted", "in_review", AIRLOCK_REQUEST_ID));
    let dead_letters = InMemoryDeadLetterQueue::new();
    let reporter = RecordingErrorReporter::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let processor = StatusUpdateProcessor::new(
        Arc::new(repository.clone()),
        Arc::new(RecordingEventPublisher::new()),
        Arc::new(reporter.clone()),
    )
    .with_dead_letter_queue(Arc::new(dead_letters.clone()), 3);

    let handle = StatusUpdateConsumer::builder()
        .receiver(Arc::new(queue.clone()))
        .processor(processor)
        .shutdown(shutdown_rx)
        .max_wait(Duration::from_millis(5))
        .redelivery_delay(Duration::from_millis(5))
        .build()
        .unwrap()
        .spawn();

    wait_until(|| queue.completed().len() == 1).await;
    shutdown_tx.send(()).unwrap();
    let stats = handle.await.unwrap();

    assert_eq!(queue.completed_ids(), vec![message_id]);
    assert_eq!(queue.outstanding(), 0);
    assert_eq!(dead_letters.letters().len(), 1);
    assert_eq!(dead_letters.letters()[0].delivery_count, 3);
    assert_eq!(reporter.count(), 3);
    assert_eq!(stats.totals.abandoned, 2);
    assert_eq!(stats.totals.dead_lettered, 1);
}

#[test]
fn builder_requires_collaborators() {
    let result = StatusUpdateConsumer::builder().build();
    assert!(matches!(result, Err(ConsumerError::MissingField("receiver"))));
}
