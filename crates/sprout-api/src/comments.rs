use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use sprout_db::{content, ledger};
use sprout_types::api::{CommentResponse, CreateCommentRequest};
use sprout_types::events::{EngagementKind, RealtimeEvent};
use sprout_types::models::{EntityType, NotificationType};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::Claims;

/// `POST /posts/{post_id}/comments` — stores the comment and, unlike a
/// toggle, a permanent notification: comments are not undoable, so their
/// notifications are never retracted.
pub async fn add_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("comment content must not be empty".into()));
    }

    let comment_id = Uuid::new_v4();
    let actor = claims.sub;
    let parent_id = req.parent_id;

    let db = state.db.clone();
    let body = req.content.clone();
    let notification = tokio::task::spawn_blocking(move || {
        db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let post = match content::lookup_entity(&tx, EntityType::Post, post_id)? {
                Some(post) => post,
                None => return Ok(None),
            };

            // A reply notifies the parent comment's author; a top-level
            // comment notifies the post's author. Either way the message
            // snapshots the target content at creation time.
            let (recipient, ntype, entity_type, entity_id, snapshot) = match parent_id {
                Some(parent) => {
                    let parent_ref =
                        match content::lookup_entity(&tx, EntityType::Comment, parent)? {
                            Some(parent_ref) => parent_ref,
                            None => return Ok(None),
                        };
                    (
                        parent_ref.owner_id,
                        NotificationType::Reply,
                        EntityType::Comment,
                        parent,
                        parent_ref.snapshot,
                    )
                }
                None => (
                    post.owner_id,
                    NotificationType::Comment,
                    EntityType::Post,
                    post_id,
                    post.snapshot,
                ),
            };

            tx.execute(
                "INSERT INTO comments (id, post_id, author_id, parent_id, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    comment_id.to_string(),
                    post_id.to_string(),
                    actor.to_string(),
                    parent_id.map(|p| p.to_string()),
                    body,
                ],
            )?;

            // No self-notifications.
            let notified = if recipient != actor {
                ledger::append(&tx, recipient, actor, ntype, entity_type, entity_id, &snapshot)?;
                Some((recipient, ntype, entity_id))
            } else {
                None
            };

            tx.commit()?;
            Ok(Some(notified))
        })
    })
    .await
    .map_err(|e| ApiError::Transaction(anyhow::anyhow!("join error: {}", e)))??
    .ok_or(ApiError::NotFound)?;

    // Committed; push is best-effort and cannot fail the request.
    if let Some((recipient, ntype, entity_id)) = notification {
        let kind = match ntype {
            NotificationType::Reply => EngagementKind::Reply,
            _ => EngagementKind::Comment,
        };
        state.dispatcher.deliver_direct(
            recipient,
            RealtimeEvent::Notification {
                kind,
                actor_id: actor,
                entity_id,
                active: true,
            },
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            id: comment_id,
            post_id,
            author_id: actor,
            parent_id: req.parent_id,
            content: req.content,
            created_at: chrono::Utc::now(),
        }),
    ))
}
