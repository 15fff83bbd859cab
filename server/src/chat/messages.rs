//! REST endpoints of the message store gateway.
//!
//! Each mutating call also triggers the matching realtime push through
//! [`ChatService`](super::service::ChatService).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use wanderchat_shared::{
    resolve, ChatError, ConversationId, ConversationLookup, DeletedMessage, Message, Role,
    SendMessageRequest,
};

use crate::auth::middleware::Claims;
use crate::chat::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    /// Role tag of the requester; must match the token when present
    pub role: Option<Role>,
}

fn check_role(claims: &Claims, role: Role) -> Result<(), ChatError> {
    if claims.role != role {
        return Err(ChatError::NotAuthorized(format!(
            "role tag '{}' does not match the authenticated account",
            role
        )));
    }
    Ok(())
}

/// POST /api/messages
/// Send a message to `receiver_id`. JWT auth required.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    check_role(&claims, body.sender_role)?;

    let message = state
        .chat
        .send(&claims.identity(), &body.receiver_id, body.body, body.client_ref)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/conversations/{conversation_id}/messages
/// Full history, oldest first. Caller must be a participant.
pub async fn get_history(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let conversation_id = ConversationId::parse(&conversation_id)?;
    let messages = state.chat.history(&claims.sub, &conversation_id).await?;
    Ok(Json(messages))
}

/// DELETE /api/messages/{message_id}?role=<role>
/// Only the sender may delete. Returns the room the deletion was pushed to.
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeletedMessage>, ApiError> {
    if let Some(role) = query.role {
        check_role(&claims, role)?;
    }

    let deleted = state.chat.delete(&claims.sub, &message_id).await?;
    Ok(Json(deleted))
}

/// GET /api/conversations/with/{peer_id}
/// Resolve the conversation id shared with another user.
pub async fn lookup_conversation(
    claims: Claims,
    Path(peer_id): Path<String>,
) -> Result<Json<ConversationLookup>, ApiError> {
    let conversation_id = resolve(&claims.sub, &peer_id)?;
    Ok(Json(ConversationLookup { conversation_id }))
}
