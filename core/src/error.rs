//! Processing failures and their acknowledgment policy.
//!
//! | Error | Disposition |
//! |---|---|
//! | [`MalformedMessage`](ProcessingError::MalformedMessage) | complete |
//! | [`RequestNotFound`](ProcessingError::RequestNotFound) | complete |
//! | [`StateStoreUnavailable`](ProcessingError::StateStoreUnavailable) | abandon |
//! | [`StatusMismatch`](ProcessingError::StatusMismatch) | abandon |
//! | [`InvalidStatus`](ProcessingError::InvalidStatus) | complete |
//! | [`UpdateFailed`](ProcessingError::UpdateFailed) | depends on the repository error |
//!
//! A message is abandoned only when a later delivery could succeed.

use crate::message::DecodeError;
use crate::repository::RepositoryError;
use crate::request::AirlockRequestStatus;
use crate::transition::TransitionError;
use std::fmt;
use thiserror::Error;

/// Prefix of every malformed-message report.
pub const STEP_RESULT_MESSAGE_FORMAT_INCORRECT: &str =
    "Step result message is not formatted correctly";

/// Fixed part of the state-store-unavailable report.
pub const STATE_STORE_ENDPOINT_NOT_RESPONDING: &str = "State store endpoint is not responding";

/// What to do with the message after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Acknowledge; the message is never delivered again
    Complete,
    /// Leave unacknowledged so the queue redelivers it
    Abandon,
}

/// Optional underlying cause appended to a report as `": cause"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cause(pub Option<String>);

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(detail) if !detail.is_empty() => write!(f, ": {detail}"),
            _ => Ok(()),
        }
    }
}

/// Why a step result message was not applied.
///
/// `Display` produces the exact line handed to the
/// [`ErrorReporter`](crate::reporting::ErrorReporter).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// Body could not be decoded
    #[error("{prefix}: {0}", prefix = STEP_RESULT_MESSAGE_FORMAT_INCORRECT)]
    MalformedMessage(#[from] DecodeError),

    /// Referenced request does not exist
    #[error("Airlock request with id {request_id} was not found")]
    RequestNotFound {
        /// Request id from the message
        request_id: String,
    },

    /// Lookup failed for a reason other than absence
    #[error("{prefix}{detail}", prefix = STATE_STORE_ENDPOINT_NOT_RESPONDING)]
    StateStoreUnavailable {
        /// Underlying error text, if any
        detail: Cause,
    },

    /// Request is not in the status the completed step ran in
    #[error(
        "Airlock request {request_id} reported completed step '{completed_step}' but its current status is {current_status}"
    )]
    StatusMismatch {
        /// Request id from the message
        request_id: String,
        /// Step named in the message
        completed_step: String,
        /// Status found in the store
        current_status: AirlockRequestStatus,
    },

    /// Claimed new status is unknown or unreachable
    #[error(
        "Airlock request {request_id} completed step '{completed_step}' with invalid new status '{new_status}'"
    )]
    InvalidStatus {
        /// Request id from the message
        request_id: String,
        /// Step named in the message
        completed_step: String,
        /// Status claimed by the message
        new_status: String,
        /// Validator verdict
        reason: TransitionError,
    },

    /// Validated update was rejected by the repository
    #[error("Failed to update status of airlock request {request_id}: {source}")]
    UpdateFailed {
        /// Request id from the message
        request_id: String,
        /// Repository error
        source: RepositoryError,
    },
}

impl ProcessingError {
    /// State store failure with an optional cause.
    #[must_use]
    pub fn state_store_unavailable(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::StateStoreUnavailable {
            detail: Cause((!detail.is_empty()).then_some(detail)),
        }
    }

    /// Whether the message should be acknowledged.
    #[must_use]
    pub const fn disposition(&self) -> Disposition {
        match self {
            Self::MalformedMessage(_) | Self::RequestNotFound { .. } | Self::InvalidStatus { .. } => {
                Disposition::Complete
            }
            Self::StateStoreUnavailable { .. } | Self::StatusMismatch { .. } => Disposition::Abandon,
            Self::UpdateFailed { source, .. } => match source {
                RepositoryError::NotFound(_) | RepositoryError::InvalidTransition(_) => {
                    Disposition::Complete
                }
                RepositoryError::Unavailable(_) | RepositoryError::Conflict { .. } => {
                    Disposition::Abandon
                }
            },
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformed",
            Self::RequestNotFound { .. } => "not_found",
            Self::StateStoreUnavailable { .. } => "state_store_unavailable",
            Self::StatusMismatch { .. } => "status_mismatch",
            Self::InvalidStatus { .. } => "invalid_status",
            Self::UpdateFailed { .. } => "update_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_message_starts_with_fixed_prefix() {
        let error = ProcessingError::from(DecodeError::InvalidFormat("expected value".to_string()));
        assert!(error.to_string().starts_with(STEP_RESULT_MESSAGE_FORMAT_INCORRECT));
        assert_eq!(error.disposition(), Disposition::Complete);
    }

    #[test]
    fn state_store_message_has_no_trailing_separator_without_cause() {
        let error = ProcessingError::state_store_unavailable("");
        assert_eq!(error.to_string(), STATE_STORE_ENDPOINT_NOT_RESPONDING);
        assert_eq!(error.disposition(), Disposition::Abandon);
    }

    #[test]
    fn state_store_message_appends_cause() {
        let error = ProcessingError::state_store_unavailable("connection refused");
        assert_eq!(
            error.to_string(),
            format!("{STATE_STORE_ENDPOINT_NOT_RESPONDING}: connection refused")
        );
    }

    #[test]
    fn status_mismatch_names_request_step_and_status() {
        let error = ProcessingError::StatusMismatch {
            request_id: "R".to_string(),
            completed_step: "submitted".to_string(),
            current_status: AirlockRequestStatus::Draft,
        };
        let line = error.to_string();
        assert!(line.contains('R'));
        assert!(line.contains("'submitted'"));
        assert!(line.contains("Draft"));
        assert_eq!(error.disposition(), Disposition::Abandon);
    }

    #[test]
    fn invalid_status_is_completed() {
        let error = ProcessingError::InvalidStatus {
            request_id: "R".to_string(),
            completed_step: "submitted".to_string(),
            new_status: "approved".to_string(),
            reason: TransitionError::NotAllowed {
                from: AirlockRequestStatus::Submitted,
                to: AirlockRequestStatus::Approved,
            },
        };
        assert!(error.to_string().contains("'approved'"));
        assert_eq!(error.disposition(), Disposition::Complete);
    }

    #[test]
    fn update_failure_disposition_follows_repository_error() {
        let failed = |source| ProcessingError::UpdateFailed {
            request_id: "R".to_string(),
            source,
        };

        assert_eq!(
            failed(RepositoryError::Unavailable("timeout".to_string())).disposition(),
            Disposition::Abandon
        );
        assert_eq!(
            failed(RepositoryError::Conflict {
                id: "R".to_string(),
                expected: AirlockRequestStatus::Submitted,
            })
            .disposition(),
            Disposition::Abandon
        );
        assert_eq!(
            failed(RepositoryError::NotFound("R".to_string())).disposition(),
            Disposition::Complete
        );
    }
}
