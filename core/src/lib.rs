//! # Airlock Core
//!
//! Domain model and adapter traits for applying airlock pipeline step results.
//!
//! A step runner reports that a pipeline step finished and proposes the
//! request's next status. This crate decides whether that proposal is
//! acceptable; the runtime crate drives the messages through it.
//!
//! ## Modules
//!
//! - [`request`]: the airlock request entity and its status enum
//! - [`transition`]: the status transition table and validator
//! - [`message`]: step result message decoding
//! - [`error`]: processing failures and their acknowledgment policy
//! - [`repository`], [`publisher`], [`queue`], [`reporting`], [`dead_letter`], [`clock`]: injected collaborators
//!
//! ## Example
//!
//! ```
//! use airlock_core::message::StepResultMessage;
//! use airlock_core::request::AirlockRequestStatus;
//! use airlock_core::transition::validate_transition;
//!
//! let body = r#"{"data": {"completed_step": "submitted", "new_status": "in_review", "request_id": "r-1"}}"#;
//! let message = StepResultMessage::decode(body).unwrap();
//!
//! let next = validate_transition(AirlockRequestStatus::Submitted, &message.data.new_status);
//! assert_eq!(next, Ok(AirlockRequestStatus::InReview));
//! ```

pub mod clock;
pub mod dead_letter;
pub mod error;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod reporting;
pub mod repository;
pub mod request;
pub mod transition;

pub use clock::{Clock, SystemClock};
pub use dead_letter::{DeadLetter, DeadLetterError, DeadLetterQueue, TracingDeadLetterQueue};
pub use error::{Disposition, ProcessingError};
pub use message::{DecodeError, StepResultData, StepResultMessage};
pub use publisher::{AirlockEvent, EventPublisher, PublishError};
pub use queue::{MessageReceiver, QueueError, ReceivedMessage};
pub use reporting::{ErrorReporter, TracingErrorReporter};
pub use repository::{AirlockRequestRepository, RepositoryError};
pub use request::{AirlockFile, AirlockRequest, AirlockRequestStatus, AirlockRequestType, User};
pub use transition::TransitionError;
