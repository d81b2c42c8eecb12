//! Step result messages published by the airlock pipeline.
//!
//! A step runner posts one message when it finishes a step:
//!
//! ```json
//! {
//!   "id": "0000c8e7-5c42-4fcb-a7fd-294cfc27aa76",
//!   "subject": "main",
//!   "data": {
//!     "completed_step": "submitted",
//!     "new_status": "in_review",
//!     "request_id": "5dbc15ae-40e1-49a5-834b-595f59d626b7"
//!   },
//!   "eventType": "StepResult",
//!   "eventTime": "2025-01-01T00:00:00Z",
//!   "topic": ""
//! }
//! ```
//!
//! Only the three `data` fields drive processing. Everything else is carried
//! through untouched.

use crate::request::AirlockRequestStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A step result message could not be turned into a [`StepResultMessage`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Body is not JSON, or a required field is missing or has the wrong type
    #[error("{0}")]
    InvalidFormat(String),
}

/// Envelope of a step result event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResultMessage {
    /// Event id assigned by the publisher
    #[serde(default)]
    pub id: String,
    /// Event subject
    #[serde(default)]
    pub subject: String,
    /// Step result payload
    pub data: StepResultData,
    /// Publisher-defined event type
    #[serde(default)]
    pub event_type: String,
    /// Publisher-defined event time (opaque)
    #[serde(default)]
    pub event_time: String,
    /// Source topic
    #[serde(default)]
    pub topic: String,
}

/// The part of a step result the processor acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResultData {
    /// Step that finished, named after the status it ran in
    pub completed_step: AirlockRequestStatus,
    /// Status the step claims the request should move to
    ///
    /// Kept raw: an unknown value is a rejected transition, not a malformed message.
    pub new_status: String,
    /// Target airlock request
    pub request_id: String,
}

impl StepResultMessage {
    /// Parse a raw message body.
    ///
    /// String values are not checked here. An empty `new_status` is left to
    /// the transition validator and an empty `request_id` to the lookup.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidFormat`] if the body is not JSON, `data` or
    /// one of its fields is missing or not a string, or `completed_step` is not
    /// a step name.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(body).map_err(|e| DecodeError::InvalidFormat(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn body(data: &serde_json::Value) -> String {
        json!({
            "id": "evt-1",
            "subject": "main",
            "data": data,
            "eventType": "bla",
            "eventTime": "test message",
            "topic": ""
        })
        .to_string()
    }

    #[test]
    fn decodes_well_formed_message() {
        let raw = body(&json!({
            "completed_step": "submitted",
            "new_status": "in_review",
            "request_id": "req-1"
        }));

        let message = StepResultMessage::decode(&raw).unwrap();
        assert_eq!(message.id, "evt-1");
        assert_eq!(message.event_type, "bla");
        assert_eq!(message.data.completed_step, AirlockRequestStatus::Submitted);
        assert_eq!(message.data.new_status, "in_review");
        assert_eq!(message.data.request_id, "req-1");
    }

    #[test]
    fn envelope_fields_are_optional() {
        let raw = json!({
            "data": {"completed_step": "in_review", "new_status": "approval_in_progress", "request_id": "r"}
        })
        .to_string();
        let message = StepResultMessage::decode(&raw).unwrap();
        assert!(message.id.is_empty());
        assert_eq!(message.data.completed_step, AirlockRequestStatus::InReview);
    }

    #[test]
    fn unknown_new_status_still_decodes() {
        let raw = body(&json!({
            "completed_step": "submitted",
            "new_status": "teleported",
            "request_id": "req-1"
        }));
        assert_eq!(StepResultMessage::decode(&raw).unwrap().data.new_status, "teleported");
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            StepResultMessage::decode("bad"),
            Err(DecodeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_json_without_data() {
        let raw = r#"{"good": "json", "bad": "message"}"#;
        assert!(matches!(
            StepResultMessage::decode(raw),
            Err(DecodeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_each_missing_data_field() {
        let full = json!({
            "completed_step": "submitted",
            "new_status": "in_review",
            "request_id": "req-1"
        });
        for field in ["completed_step", "new_status", "request_id"] {
            let mut data = full.clone();
            data.as_object_mut().unwrap().remove(field);
            assert!(
                StepResultMessage::decode(&body(&data)).is_err(),
                "missing {field} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_wrongly_typed_fields() {
        let raw = body(&json!({
            "completed_step": "submitted",
            "new_status": 7,
            "request_id": "req-1"
        }));
        assert!(StepResultMessage::decode(&raw).is_err());
    }

    #[test]
    fn rejects_unknown_step_name() {
        let raw = body(&json!({
            "completed_step": "scanning",
            "new_status": "in_review",
            "request_id": "req-1"
        }));
        assert!(matches!(
            StepResultMessage::decode(&raw),
            Err(DecodeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn empty_strings_are_well_formed() {
        let raw = body(&json!({
            "completed_step": "submitted",
            "new_status": "",
            "request_id": ""
        }));
        let message = StepResultMessage::decode(&raw).unwrap();
        assert!(message.data.new_status.is_empty());
        assert!(message.data.request_id.is_empty());
    }

    proptest! {
        #[test]
        fn decode_never_panics(raw in ".{0,128}") {
            let _ = StepResultMessage::decode(&raw);
        }
    }
}
