//! In-memory repository and recording publisher.
//!
//! Both types are cheap to clone; clones share state, so a test can keep one
//! handle for assertions and hand another to the processor.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use airlock_core::clock::Clock;
use airlock_core::publisher::{AirlockEvent, EventPublisher, PublishError};
use airlock_core::repository::{AirlockRequestRepository, RepositoryError, RepositoryFuture};
use airlock_core::request::{AirlockRequest, AirlockRequestStatus, User};
use airlock_core::transition::check_transition;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};

use crate::mocks::test_clock;

/// Arguments of one `update_status` call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCall {
    /// Request as passed by the caller
    pub request: AirlockRequest,
    /// Requested status
    pub new_status: AirlockRequestStatus,
    /// Acting user
    pub user: User,
}

#[derive(Debug, Default)]
struct Failures {
    lookup: Option<RepositoryError>,
    update: Option<RepositoryError>,
}

/// `HashMap`-backed repository.
///
/// Behaves like a real store (re-validates transitions, detects concurrent
/// status changes) and records every call.
///
/// # Example
///
/// ```
/// use airlock_testing::InMemoryAirlockRequestRepository;
/// use airlock_testing::fixtures::sample_airlock_request;
/// use airlock_core::request::AirlockRequestStatus;
///
/// let repository = InMemoryAirlockRequestRepository::new();
/// repository.insert(sample_airlock_request(AirlockRequestStatus::Draft));
/// assert_eq!(repository.len(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryAirlockRequestRepository {
    requests: Arc<RwLock<HashMap<String, AirlockRequest>>>,
    lookups: Arc<Mutex<Vec<String>>>,
    updates: Arc<Mutex<Vec<UpdateCall>>>,
    failures: Arc<Mutex<Failures>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAirlockRequestRepository {
    /// Create an empty repository stamping updates with [`test_clock`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(test_clock()))
    }

    /// Create an empty repository with a custom clock
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            lookups: Arc::new(Mutex::new(Vec::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Failures::default())),
            clock,
        }
    }

    /// Store or replace a request
    pub fn insert(&self, request: AirlockRequest) {
        self.requests
            .write()
            .unwrap()
            .insert(request.id.clone(), request);
    }

    /// Current stored copy of a request
    #[must_use]
    pub fn get(&self, request_id: &str) -> Option<AirlockRequest> {
        self.requests.read().unwrap().get(request_id).cloned()
    }

    /// Overwrite the stored status without validation (simulates another writer)
    pub fn force_status(&self, request_id: &str, status: AirlockRequestStatus) {
        if let Some(request) = self.requests.write().unwrap().get_mut(request_id) {
            request.status = status;
        }
    }

    /// Number of stored requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.read().unwrap().len()
    }

    /// Check if the repository is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.read().unwrap().is_empty()
    }

    /// Make every `get_by_id` fail with `error` until cleared
    pub fn fail_lookups_with(&self, error: RepositoryError) {
        self.failures.lock().unwrap().lookup = Some(error);
    }

    /// Make every `update_status` fail with `error` until cleared
    pub fn fail_updates_with(&self, error: RepositoryError) {
        self.failures.lock().unwrap().update = Some(error);
    }

    /// Remove injected failures
    pub fn clear_failures(&self) {
        *self.failures.lock().unwrap() = Failures::default();
    }

    /// Ids passed to `get_by_id`, in call order
    #[must_use]
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    /// Arguments of every `update_status` call, in call order
    #[must_use]
    pub fn update_calls(&self) -> Vec<UpdateCall> {
        self.updates.lock().unwrap().clone()
    }

    fn apply_update(
        &self,
        request: &AirlockRequest,
        new_status: AirlockRequestStatus,
        user: &User,
    ) -> Result<AirlockRequest, RepositoryError> {
        let mut requests = self.requests.write().unwrap();
        let stored = requests
            .get_mut(&request.id)
            .ok_or_else(|| RepositoryError::NotFound(request.id.clone()))?;

        if stored.status != request.status {
            return Err(RepositoryError::Conflict {
                id: request.id.clone(),
                expected: request.status,
            });
        }
        check_transition(stored.status, new_status)?;

        stored.status = new_status;
        stored.updated_by = Some(user.clone());
        stored.updated_when = self.clock.now();
        Ok(stored.clone())
    }
}

impl Default for InMemoryAirlockRequestRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl AirlockRequestRepository for InMemoryAirlockRequestRepository {
    fn get_by_id<'a>(&'a self, request_id: &'a str) -> RepositoryFuture<'a, AirlockRequest> {
        Box::pin(async move {
            self.lookups.lock().unwrap().push(request_id.to_string());

            if let Some(error) = self.failures.lock().unwrap().lookup.clone() {
                return Err(error);
            }

            self.get(request_id)
                .ok_or_else(|| RepositoryError::NotFound(request_id.to_string()))
        })
    }

    fn update_status<'a>(
        &'a self,
        request: &'a AirlockRequest,
        new_status: AirlockRequestStatus,
        user: &'a User,
    ) -> RepositoryFuture<'a, AirlockRequest> {
        Box::pin(async move {
            self.updates.lock().unwrap().push(UpdateCall {
                request: request.clone(),
                new_status,
                user: user.clone(),
            });

            if let Some(error) = self.failures.lock().unwrap().update.clone() {
                return Err(error);
            }

            self.apply_update(request, new_status, user)
        })
    }
}

/// Publisher that records events instead of sending them.
#[derive(Clone, Debug, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<AirlockEvent>>>,
    attempts: Arc<Mutex<usize>>,
    failure: Arc<Mutex<Option<PublishError>>>,
}

impl RecordingEventPublisher {
    /// Create a publisher that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish with `error` until cleared
    pub fn fail_with(&self, error: PublishError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Accept publishes again
    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Successfully published events, in order
    #[must_use]
    pub fn events(&self) -> Vec<AirlockEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of `publish` calls, successful or not
    #[must_use]
    pub fn publish_calls(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Topics of successfully published events, in order
    #[must_use]
    pub fn topics(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(AirlockEvent::topic)
            .collect()
    }
}

impl EventPublisher for RecordingEventPublisher {
    fn publish<'a>(
        &'a self,
        event: &'a AirlockEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>> {
        Box::pin(async move {
            *self.attempts.lock().unwrap() += 1;

            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }

            self.events.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{AIRLOCK_REQUEST_ID, sample_airlock_request, test_user};

    #[tokio::test]
    async fn lookup_of_missing_request_is_not_found() {
        let repository = InMemoryAirlockRequestRepository::new();
        let result = repository.get_by_id("missing").await;

        assert_eq!(result, Err(RepositoryError::NotFound("missing".to_string())));
        assert_eq!(repository.lookups(), vec!["missing"]);
    }

    #[tokio::test]
    async fn update_applies_legal_transition_and_stamps_user() {
        let repository = InMemoryAirlockRequestRepository::new();
        let request = sample_airlock_request(AirlockRequestStatus::Submitted);
        repository.insert(request.clone());

        let updated = repository
            .update_status(&request, AirlockRequestStatus::InReview, &test_user())
            .await
            .unwrap();

        assert_eq!(updated.status, AirlockRequestStatus::InReview);
        assert_eq!(updated.updated_by, Some(test_user()));
        assert_eq!(
            repository.get(AIRLOCK_REQUEST_ID).unwrap().status,
            AirlockRequestStatus::InReview
        );
    }

    #[tokio::test]
    async fn update_rejects_illegal_transition() {
        let repository = InMemoryAirlockRequestRepository::new();
        let request = sample_airlock_request(AirlockRequestStatus::Submitted);
        repository.insert(request.clone());

        let result = repository
            .update_status(&request, AirlockRequestStatus::Approved, &test_user())
            .await;

        assert!(matches!(result, Err(RepositoryError::InvalidTransition(_))));
        assert_eq!(repository.update_calls().len(), 1);
    }

    #[tokio::test]
    async fn update_detects_concurrent_status_change() {
        let repository = InMemoryAirlockRequestRepository::new();
        let request = sample_airlock_request(AirlockRequestStatus::Submitted);
        repository.insert(request.clone());
        repository.force_status(AIRLOCK_REQUEST_ID, AirlockRequestStatus::Failed);

        let result = repository
            .update_status(&request, AirlockRequestStatus::InReview, &test_user())
            .await;

        assert!(matches!(result, Err(RepositoryError::Conflict { .. })));
    }

    #[tokio::test]
    async fn injected_lookup_failure_is_returned() {
        let repository = InMemoryAirlockRequestRepository::new();
        repository.insert(sample_airlock_request(AirlockRequestStatus::Submitted));
        repository.fail_lookups_with(RepositoryError::Unavailable("down".to_string()));

        assert!(matches!(
            repository.get_by_id(AIRLOCK_REQUEST_ID).await,
            Err(RepositoryError::Unavailable(_))
        ));

        repository.clear_failures();
        assert!(repository.get_by_id(AIRLOCK_REQUEST_ID).await.is_ok());
    }

    #[tokio::test]
    async fn publisher_counts_failed_attempts() {
        let publisher = RecordingEventPublisher::new();
        let request = sample_airlock_request(AirlockRequestStatus::InReview);
        let [event, _] =
            airlock_core::publisher::status_update_events(AirlockRequestStatus::Submitted, &request);

        publisher.fail_with(PublishError::PublishFailed {
            topic: event.topic().to_string(),
            reason: "broker down".to_string(),
        });
        assert!(publisher.publish(&event).await.is_err());

        publisher.clear_failure();
        assert!(publisher.publish(&event).await.is_ok());

        assert_eq!(publisher.publish_calls(), 2);
        assert_eq!(publisher.events().len(), 1);
    }
}
