//! `POST /conversation`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use super::routes::AppState;
use super::types::{ApiError, ConversationRequest, ConversationResponse};

/// Answer one message, replaying the client's history.
pub async fn conversation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConversationRequest>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("กรุณาพิมพ์คำถามก่อนส่ง"));
    }

    let outcome = state.agent.run(message, req.mode, &req.history).await?;
    tracing::info!(
        termination = ?outcome.termination,
        round_trips = outcome.round_trips,
        "Conversation answered"
    );

    Ok(Json(ConversationResponse {
        message: outcome.answer,
    }))
}
