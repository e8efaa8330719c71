//! Request and response envelopes for the HTTP layer

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::lead::ActionKind;

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Body of `POST /api/leads/:id/actions`
#[derive(Debug, Deserialize, Validate)]
pub struct RecordActionRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    pub action: ActionKind,
}

/// Body of `POST /api/leads`
#[derive(Debug, Default, Deserialize)]
pub struct SubmitLeadRequest {
    /// Caller-assigned id; generated when absent
    pub id: Option<Uuid>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub scheduler_running: bool,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_request_validation() {
        let ok: RecordActionRequest =
            serde_json::from_str(r#"{"user_id":"bank-7","action":"purchase"}"#).unwrap();
        assert_eq!(ok.action, ActionKind::Purchase);
        assert!(ok.validate().is_ok());

        let empty: RecordActionRequest =
            serde_json::from_str(r#"{"user_id":"","action":"open"}"#).unwrap();
        assert!(empty.validate().is_err());

        assert!(serde_json::from_str::<RecordActionRequest>(
            r#"{"user_id":"bank-7","action":"bid"}"#
        )
        .is_err());
    }
}
