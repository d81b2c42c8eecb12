//! Test data shaped like real pipeline traffic.

use crate::mocks::test_clock;
use airlock_core::clock::Clock;
use airlock_core::request::{AirlockRequest, AirlockRequestStatus, AirlockRequestType, User};
use serde_json::json;

/// Workspace used by [`sample_airlock_request`].
pub const WORKSPACE_ID: &str = "abc000d3-82da-4bfc-b6e9-9a7853ef753e";

/// Request id used by [`sample_airlock_request`].
pub const AIRLOCK_REQUEST_ID: &str = "5dbc15ae-40e1-49a5-834b-595f59d626b7";

/// Event id used by [`step_result_body`].
pub const EVENT_ID: &str = "0000c8e7-5c42-4fcb-a7fd-294cfc27aa76";

/// Owner of [`sample_airlock_request`].
#[must_use]
pub fn test_user() -> User {
    User {
        id: "user-guid-here".to_string(),
        name: "Test User".to_string(),
        email: "test@user.com".to_string(),
    }
}

/// An import request with no files in `status`.
#[must_use]
pub fn sample_airlock_request(status: AirlockRequestStatus) -> AirlockRequest {
    let created = test_clock().now();
    AirlockRequest {
        id: AIRLOCK_REQUEST_ID.to_string(),
        workspace_id: WORKSPACE_ID.to_string(),
        request_type: AirlockRequestType::Import,
        files: vec![],
        business_justification: "some test reason".to_string(),
        status,
        user: test_user(),
        created_when: created,
        updated_when: created,
        updated_by: None,
    }
}

/// Full step result envelope as the step runner sends it.
#[must_use]
pub fn step_result_body(completed_step: &str, new_status: &str, request_id: &str) -> String {
    json!({
        "id": EVENT_ID,
        "subject": "main",
        "data": {
            "completed_step": completed_step,
            "new_status": new_status,
            "request_id": request_id
        },
        "eventType": "bla",
        "eventTime": "test message",
        "topic": ""
    })
    .to_string()
}
