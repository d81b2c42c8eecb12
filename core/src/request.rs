//! Airlock request entity and its value types.
//!
//! An airlock request tracks the import or export of files into or out of a
//! workspace. Only the status moves once the request is created, and only
//! through [`AirlockRequestRepository::update_status`](crate::repository::AirlockRequestRepository::update_status).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an airlock request.
///
/// The wire form (JSON, database, step names) is `snake_case`; use
/// [`as_str`](Self::as_str) and [`parse`](Self::parse) to cross that boundary.
/// [`Display`](fmt::Display) prints the variant name for operator-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirlockRequestStatus {
    /// Created but not yet submitted by the owner
    Draft,
    /// Submitted; the pipeline is copying and scanning files
    Submitted,
    /// Waiting for a reviewer decision
    InReview,
    /// Approval accepted, files being moved to their destination
    ApprovalInProgress,
    /// Files delivered
    Approved,
    /// Rejection accepted, files being cleaned up
    RejectionInProgress,
    /// Rejected by a reviewer
    Rejected,
    /// Withdrawn by the owner
    Cancelled,
    /// Malware scan flagged the files, blocking in progress
    BlockingInProgress,
    /// Blocked by the malware scan
    Blocked,
    /// A pipeline step failed
    Failed,
}

impl AirlockRequestStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 11] = [
        Self::Draft,
        Self::Submitted,
        Self::InReview,
        Self::ApprovalInProgress,
        Self::Approved,
        Self::RejectionInProgress,
        Self::Rejected,
        Self::Cancelled,
        Self::BlockingInProgress,
        Self::Blocked,
        Self::Failed,
    ];

    /// Wire representation (e.g. `"in_review"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::InReview => "in_review",
            Self::ApprovalInProgress => "approval_in_progress",
            Self::Approved => "approved",
            Self::RejectionInProgress => "rejection_in_progress",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::BlockingInProgress => "blocking_in_progress",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    /// Parse a wire representation. Returns `None` for anything else,
    /// including variant names such as `"InReview"`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }
}

impl fmt::Display for AirlockRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "Draft",
            Self::Submitted => "Submitted",
            Self::InReview => "InReview",
            Self::ApprovalInProgress => "ApprovalInProgress",
            Self::Approved => "Approved",
            Self::RejectionInProgress => "RejectionInProgress",
            Self::Rejected => "Rejected",
            Self::Cancelled => "Cancelled",
            Self::BlockingInProgress => "BlockingInProgress",
            Self::Blocked => "Blocked",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Direction of the data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AirlockRequestType {
    /// Files enter the workspace
    Import,
    /// Files leave the workspace
    Export,
}

impl AirlockRequestType {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Export => "export",
        }
    }

    /// Parse a wire representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "import" => Some(Self::Import),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

/// A user reference as stored on the request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    /// Identity provider object id
    pub id: String,
    /// Display name
    pub name: String,
    /// Contact address
    pub email: String,
}

/// A file attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirlockFile {
    /// File name within the request container
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// An import/export request moving through the review pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirlockRequest {
    /// Request id (UUID string)
    pub id: String,
    /// Owning workspace
    pub workspace_id: String,
    /// Import or export
    #[serde(rename = "type")]
    pub request_type: AirlockRequestType,
    /// Files in the request, in upload order
    #[serde(default)]
    pub files: Vec<AirlockFile>,
    /// Free-text reason supplied by the owner
    pub business_justification: String,
    /// Current status
    pub status: AirlockRequestStatus,
    /// Owning user
    pub user: User,
    /// Creation time
    pub created_when: DateTime<Utc>,
    /// Time of the last status change
    pub updated_when: DateTime<Utc>,
    /// Who made the last status change
    #[serde(default)]
    pub updated_by: Option<User>,
}
