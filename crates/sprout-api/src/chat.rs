use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use sprout_types::api::{
    ChatMessageResponse, ConversationResponse, CreateConversationRequest, SendChatRequest,
};
use sprout_types::events::RealtimeEvent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::Claims;

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.member_ids.is_empty() {
        return Err(ApiError::BadRequest("a conversation needs members".into()));
    }

    let mut members = req.member_ids.clone();
    if !members.contains(&claims.sub) {
        members.push(claims.sub);
    }

    let conversation_id = Uuid::new_v4();
    let is_group = members.len() > 2;

    let db = state.db.clone();
    let name = req.name.clone();
    let missing = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Uuid>> {
        let missing = db.unknown_users(&members)?;
        if missing.is_empty() {
            db.create_conversation(conversation_id, name.as_deref(), &members)?;
        }
        Ok(missing)
    })
    .await
    .map_err(|e| ApiError::Transaction(anyhow::anyhow!("join error: {}", e)))??;

    if let Some(id) = missing.first() {
        return Err(ApiError::BadRequest(format!("unknown member {id}")));
    }

    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse {
            id: conversation_id,
            name: req.name,
            is_group,
        }),
    ))
}

/// `POST /conversations/{id}/messages` — stores the message, then pushes a
/// chat_message event to every other member with a live connection. Members
/// who are offline simply miss the push; the stored row is the fallback.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.is_empty() {
        return Err(ApiError::BadRequest("message content must not be empty".into()));
    }

    let sender = claims.sub;
    let message_id = Uuid::new_v4();

    let db = state.db.clone();
    let content = req.content.clone();
    let members = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Vec<Uuid>>> {
        let members = match db.conversation_members(conversation_id)? {
            Some(members) => members,
            None => return Ok(None),
        };
        if !members.contains(&sender) {
            return Ok(None);
        }
        db.insert_message(message_id, conversation_id, sender, &content)?;
        Ok(Some(members))
    })
    .await
    .map_err(|e| ApiError::Transaction(anyhow::anyhow!("join error: {}", e)))??
    .ok_or(ApiError::NotFound)?;

    let created_at = chrono::Utc::now();

    // Committed; fan out to the other members, best-effort.
    let event = RealtimeEvent::ChatMessage {
        conversation_id,
        sender_id: sender,
        content: req.content.clone(),
        created_at,
    };
    for member in members.iter().filter(|&&m| m != sender) {
        state.dispatcher.deliver_direct(*member, event.clone());
    }

    Ok((
        StatusCode::CREATED,
        Json(ChatMessageResponse {
            id: message_id,
            conversation_id,
            sender_id: sender,
            content: req.content,
            created_at,
        }),
    ))
}
