//! Direct message routes
//!
//! Every handler runs behind `require_auth`; the caller is always one of the
//! two participants named by the path or body.

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    Json,
};
use parley_shared::{
    ChatPartner, Message, MessageDraft, MessageId, MessageView, UnreadCount, UserId, UserProfile,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(default)]
    pub sender_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub success: bool,
    pub count: usize,
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub success: bool,
    pub messages: Vec<MessageView>,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /message/send/:receiver_id
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(receiver_id): Path<UserId>,
    body: Result<Json<MessageDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let Json(draft) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let outcome = state
        .dispatcher
        .send(auth_user.user_id, receiver_id, draft)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome.message)))
}

/// GET /message/:partner_id
///
/// Does not mark anything read; clients follow up with `mark-read`.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(partner_id): Path<UserId>,
) -> ApiResult<Json<ConversationResponse>> {
    let messages = state
        .dispatcher
        .history(auth_user.user_id, partner_id)
        .await?;

    Ok(Json(ConversationResponse {
        success: true,
        messages,
    }))
}

/// POST /message/mark-read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    body: Result<Json<MarkReadRequest>, JsonRejection>,
) -> ApiResult<Json<MarkReadResponse>> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let sender_id = req
        .sender_id
        .ok_or_else(|| ApiError::Validation("senderId is required".to_string()))?;

    let ack = state.dispatcher.mark_read(auth_user.user_id, sender_id).await?;

    Ok(Json(MarkReadResponse {
        success: true,
        count: ack.count(),
        message_ids: ack.message_ids,
    }))
}

/// GET /message/chats
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ChatPartner>>> {
    let partners = state.unread.chat_partners(auth_user.user_id).await?;
    Ok(Json(partners))
}

/// GET /message/contacts
pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<UserProfile>>> {
    let contacts = state.directory.list_contacts(auth_user.user_id).await?;
    Ok(Json(contacts))
}

/// GET /message/unread/:partner_id
pub async fn get_unread_count(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(partner_id): Path<UserId>,
) -> ApiResult<Json<UnreadCount>> {
    let unread_count = state
        .unread
        .count_unread(auth_user.user_id, partner_id)
        .await?;

    Ok(Json(UnreadCount {
        partner_id,
        unread_count,
    }))
}
