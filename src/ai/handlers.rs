// src/ai/handlers.rs

use axum::extract::{rejection::JsonRejection, Extension, Json};
use tracing::{error, info};

use super::models::{ChatRequest, ChatResponse};
use crate::auth::Principal;
use crate::common::{ApiError, SharedState};

/// POST /ai/chat - Forward one message to the model and return its reply
pub async fn chat(
    Extension(state_lock): Extension<SharedState>,
    principal: Principal,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let state = state_lock.read().await.clone();
    let message_required = || ApiError::BadRequest("Message is required".to_string());

    let Json(payload) = payload.map_err(|_| message_required())?;
    let message = payload
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(message_required)?;

    let reply = state.gemini_service.ask(&message).await.map_err(|e| {
        error!(error = %e, user_id = %principal.id, "AI chat request failed");
        ApiError::Upstream("AI service temporarily unavailable".to_string())
    })?;

    info!(user_id = %principal.id, reply_len = reply.len(), "AI chat reply generated");
    Ok(Json(ChatResponse { reply }))
}
