//! Status transition rules for airlock requests.
//!
//! The table below is the single place that decides which status changes are
//! legal. Both the message processor and the repositories consult it, so a
//! step result can never move a request along an edge that does not exist.
//!
//! ```text
//! Draft ──► Submitted ──► InReview ──► ApprovalInProgress ──► Approved
//!   │           │            │  └────► RejectionInProgress ─► Rejected
//!   │           │            └───────► Cancelled
//!   │           └──► BlockingInProgress ──► Blocked
//!   └──► Cancelled
//!
//! Submitted / ApprovalInProgress / RejectionInProgress / BlockingInProgress ──► Failed
//! ```

use crate::request::AirlockRequestStatus;
use thiserror::Error;

/// Why a claimed status change was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The claimed status is not a status at all
    #[error("unknown status '{0}'")]
    UnknownStatus(String),

    /// The claimed status exists but cannot follow the current one
    #[error("transition from {from} to {to} is not allowed")]
    NotAllowed {
        /// Status the request is currently in
        from: AirlockRequestStatus,
        /// Status that was claimed
        to: AirlockRequestStatus,
    },
}

/// Statuses reachable in one step from `status`.
#[must_use]
pub const fn allowed_transitions(status: AirlockRequestStatus) -> &'static [AirlockRequestStatus] {
    use AirlockRequestStatus::{
        ApprovalInProgress, Approved, Blocked, BlockingInProgress, Cancelled, Draft, Failed,
        InReview, RejectionInProgress, Rejected, Submitted,
    };

    match status {
        Draft => &[Submitted, Cancelled],
        Submitted => &[InReview, BlockingInProgress, Failed],
        InReview => &[ApprovalInProgress, RejectionInProgress, Cancelled],
        ApprovalInProgress => &[Approved, Failed],
        RejectionInProgress => &[Rejected, Failed],
        BlockingInProgress => &[Blocked, Failed],
        Approved | Rejected | Cancelled | Blocked | Failed => &[],
    }
}

/// `true` when no further transition is possible.
#[must_use]
pub const fn is_terminal(status: AirlockRequestStatus) -> bool {
    allowed_transitions(status).is_empty()
}

/// Status a request must be in for a step result naming `completed_step`
/// to apply. Pipeline steps are named after the status the request holds
/// while the step runs.
#[must_use]
pub const fn required_status_for_step(completed_step: AirlockRequestStatus) -> AirlockRequestStatus {
    completed_step
}

/// Check a typed transition.
///
/// # Errors
///
/// Returns [`TransitionError::NotAllowed`] when `to` is not reachable from `from`.
pub fn check_transition(
    from: AirlockRequestStatus,
    to: AirlockRequestStatus,
) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::NotAllowed { from, to })
    }
}

/// Validate a claimed status string against the current status.
///
/// # Errors
///
/// - [`TransitionError::UnknownStatus`] if `claimed` is not a status wire value
/// - [`TransitionError::NotAllowed`] if it is, but cannot follow `current`
pub fn validate_transition(
    current: AirlockRequestStatus,
    claimed: &str,
) -> Result<AirlockRequestStatus, TransitionError> {
    let to = AirlockRequestStatus::parse(claimed)
        .ok_or_else(|| TransitionError::UnknownStatus(claimed.to_string()))?;
    check_transition(current, to)?;
    Ok(to)
}
