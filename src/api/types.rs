//! API request and response types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{AgentError, HistoryTurn, Mode};
use crate::jobs::UploadStatus;

/// Request to answer one user message.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationRequest {
    /// The user's question
    pub message: String,

    /// `document` (default) or `general`
    #[serde(default)]
    pub mode: Mode,

    /// Prior turns replayed by the client
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadQuery {
    /// Wait for ingestion to finish before answering
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Status text, or an acknowledgement when running in the background
    pub message: String,
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: UploadStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error body returned to clients: `{"message": "..."}`.
///
/// Messages are written for end users. Internal details go to the log only.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: &self.message,
            }),
        )
            .into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        tracing::error!(error = %e, "Agent run failed");
        match e {
            AgentError::Timeout(_) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "ระบบใช้เวลาประมวลผลนานเกินไป กรุณาลองใหม่อีกครั้ง",
            ),
            AgentError::Model(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                "ไม่สามารถติดต่อโมเดลภาษาได้ในขณะนี้ กรุณาลองใหม่อีกครั้ง",
            ),
            AgentError::State(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "เกิดข้อผิดพลาดภายในระบบ กรุณาลองใหม่อีกครั้ง",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StateError;
    use crate::llm::LlmError;
    use serde_json::{json, Value};
    use std::time::Duration;

    #[test]
    fn conversation_request_defaults() {
        let req: ConversationRequest =
            serde_json::from_value(json!({"message": "สวัสดี"})).unwrap();
        assert_eq!(req.mode, Mode::Document);
        assert!(req.history.is_empty());

        let req: ConversationRequest = serde_json::from_value(json!({
            "message": "x",
            "mode": "general",
            "history": [{"sender": "user", "text": "ก่อนหน้า"}]
        }))
        .unwrap();
        assert_eq!(req.mode, Mode::General);
        assert_eq!(req.history.len(), 1);
    }

    #[test]
    fn upload_waits_by_default() {
        let q: UploadQuery = serde_json::from_value(json!({})).unwrap();
        assert!(q.wait);
    }

    #[test]
    fn agent_errors_map_to_statuses() {
        let timeout: ApiError = AgentError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(timeout.status, StatusCode::GATEWAY_TIMEOUT);

        let model: ApiError = AgentError::Model(LlmError::invalid_response("gemini", "x")).into();
        assert_eq!(model.status, StatusCode::BAD_GATEWAY);
        assert!(!model.message.contains("gemini"));

        let state: ApiError = AgentError::State(StateError::PendingToolCalls(1)).into();
        assert_eq!(state.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn error_body_is_json_message() {
        let response = ApiError::bad_request("กรุณาพิมพ์คำถาม").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"message": "กรุณาพิมพ์คำถาม"}));
    }
}
