//! Durable storage for airlock requests.
//!
//! The processor only ever reads a request by id and moves its status. How the
//! request is stored is up to the implementation:
//!
//! - `InMemoryAirlockRequestRepository` (`airlock-testing`) for tests
//! - `PostgresAirlockRequestRepository` (`airlock-postgres`) for production
//!
//! # Error classes
//!
//! Implementations must keep "the request does not exist" apart from "the
//! store could not be reached". The processor acknowledges the first and
//! leaves the second on the queue for redelivery.

use crate::request::{AirlockRequest, AirlockRequestStatus, User};
use crate::transition::TransitionError;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by an [`AirlockRequestRepository`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No request with this id exists
    #[error("airlock request {0} not found")]
    NotFound(String),

    /// The backing store could not be reached or failed the operation
    #[error("{0}")]
    Unavailable(String),

    /// The request changed status between read and write
    #[error("airlock request {id} is no longer in status {expected}")]
    Conflict {
        /// Request id
        id: String,
        /// Status the write expected to replace
        expected: AirlockRequestStatus,
    },

    /// The store refused the transition
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

/// Boxed future returned by repository operations.
pub type RepositoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Read and status-update access to airlock requests.
///
/// Returns boxed futures so the processor can hold an
/// `Arc<dyn AirlockRequestRepository>`.
pub trait AirlockRequestRepository: Send + Sync {
    /// Load a request.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] if no request has this id
    /// - [`RepositoryError::Unavailable`] on any storage failure
    fn get_by_id<'a>(&'a self, request_id: &'a str) -> RepositoryFuture<'a, AirlockRequest>;

    /// Move `request` to `new_status` on behalf of `user` and return the stored result.
    ///
    /// Implementations re-check the transition against the stored status
    /// rather than trusting `request.status`.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] if the request disappeared
    /// - [`RepositoryError::InvalidTransition`] if the transition is not legal
    /// - [`RepositoryError::Conflict`] if the stored status moved meanwhile
    /// - [`RepositoryError::Unavailable`] on any storage failure
    fn update_status<'a>(
        &'a self,
        request: &'a AirlockRequest,
        new_status: AirlockRequestStatus,
        user: &'a User,
    ) -> RepositoryFuture<'a, AirlockRequest>;
}
