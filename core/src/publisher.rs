//! Status change notifications.
//!
//! Every successful status update fans out to exactly two events:
//!
//! ```text
//!                 update_status
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌──────────────────┐   ┌──────────────────┐
//! │  StatusChanged   │   │   Notification   │
//! │ (pipeline steps) │   │ (mail, UI, etc.) │
//! └──────────────────┘   └──────────────────┘
//! ```
//!
//! Publishing is best-effort from the processor's point of view: a failed
//! publish is logged and counted but never reverts or re-queues the update.

use crate::request::{AirlockRequest, AirlockRequestStatus, AirlockRequestType};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Topic for [`StatusChangedEvent`]s.
pub const STATUS_CHANGED_TOPIC: &str = "airlock-status-changed";

/// Topic for [`NotificationEvent`]s.
pub const NOTIFICATION_TOPIC: &str = "airlock-notification";

/// Errors that can occur while publishing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Event could not be serialized
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Transport refused or timed out
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// Destination topic
        topic: String,
        /// Transport error
        reason: String,
    },
}

/// Consumed by the pipeline to start the step for the new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangedEvent {
    /// Request id
    pub request_id: String,
    /// Status after the update
    pub new_status: AirlockRequestStatus,
    /// Status before the update
    pub previous_status: AirlockRequestStatus,
    /// Import or export
    #[serde(rename = "type")]
    pub request_type: AirlockRequestType,
    /// Owning workspace
    pub workspace_id: String,
}

/// Consumed by notification subscribers (mail, UI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Notification kind
    pub event_type: String,
    /// Snapshot of the request after the update
    pub request: AirlockRequest,
}

/// A domain event emitted after a status update.
#[derive(Debug, Clone, PartialEq)]
pub enum AirlockEvent {
    /// See [`StatusChangedEvent`]
    StatusChanged(StatusChangedEvent),
    /// See [`NotificationEvent`]
    Notification(NotificationEvent),
}

impl AirlockEvent {
    /// Destination topic.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => STATUS_CHANGED_TOPIC,
            Self::Notification(_) => NOTIFICATION_TOPIC,
        }
    }

    /// Stable event type identifier.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => "AirlockStatusChanged.v1",
            Self::Notification(_) => "AirlockNotification.v1",
        }
    }

    /// Request the event is about; used as the partition key.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::StatusChanged(event) => &event.request_id,
            Self::Notification(event) => &event.request.id,
        }
    }

    /// JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Serialization`] if the payload cannot be encoded.
    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        let bytes = match self {
            Self::StatusChanged(event) => serde_json::to_vec(event),
            Self::Notification(event) => serde_json::to_vec(event),
        };
        bytes.map_err(|e| PublishError::Serialization(e.to_string()))
    }
}

/// Build the two events that follow a status update.
#[must_use]
pub fn status_update_events(
    previous_status: AirlockRequestStatus,
    updated: &AirlockRequest,
) -> [AirlockEvent; 2] {
    [
        AirlockEvent::StatusChanged(StatusChangedEvent {
            request_id: updated.id.clone(),
            new_status: updated.status,
            previous_status,
            request_type: updated.request_type,
            workspace_id: updated.workspace_id.clone(),
        }),
        AirlockEvent::Notification(NotificationEvent {
            event_type: "status_changed".to_string(),
            request: updated.clone(),
        }),
    ]
}

/// Emits [`AirlockEvent`]s to downstream subscribers.
pub trait EventPublisher: Send + Sync {
    /// Publish one event to its topic.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the event could not be encoded or delivered.
    fn publish<'a>(
        &'a self,
        event: &'a AirlockEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>>;
}
