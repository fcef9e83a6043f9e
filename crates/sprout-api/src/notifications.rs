use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use sprout_db::models::NotificationRow;
use sprout_types::api::{
    MarkReadRequest, MarkReadResponse, NotificationItem, NotificationPage,
};
use sprout_types::models::{EntityType, NotificationType};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::Claims;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    20
}

/// `GET /notifications?offset&limit` — newest first, with a total count
/// computed independent of the window. This is the offline fallback for
/// everything the dispatcher could not deliver live.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(100);
    let offset = query.offset;

    // Run blocking DB work off the async runtime
    let db = state.db.clone();
    let recipient = claims.sub;
    let (rows, total) = tokio::task::spawn_blocking(move || {
        db.list_notifications(recipient, offset, limit)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Transaction(anyhow::anyhow!("join error: {}", e))
    })??;

    let items = rows.into_iter().filter_map(into_item).collect();

    Ok(Json(NotificationPage { items, total }))
}

/// `POST /notifications/read` — flips is_read for the caller's rows only.
/// Ids owned by someone else, or unknown, are silently left out of the
/// response.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let recipient = claims.sub;
    let updated = tokio::task::spawn_blocking(move || {
        db.mark_notifications_read(&req.ids, recipient)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Transaction(anyhow::anyhow!("join error: {}", e))
    })??;

    Ok(Json(MarkReadResponse { updated }))
}

/// Convert a stored row to its API shape, dropping rows whose stored fields
/// no longer parse rather than failing the whole page.
fn into_item(row: NotificationRow) -> Option<NotificationItem> {
    let id = row.id.parse::<Uuid>().ok()?;
    let actor_id = match row.actor_id.parse::<Uuid>() {
        Ok(id) => id,
        Err(e) => {
            warn!("corrupt actor_id '{}' on notification '{}': {}", row.actor_id, row.id, e);
            return None;
        }
    };
    let entity_id = match row.entity_id.parse::<Uuid>() {
        Ok(id) => id,
        Err(e) => {
            warn!("corrupt entity_id '{}' on notification '{}': {}", row.entity_id, row.id, e);
            return None;
        }
    };
    let kind = NotificationType::parse(&row.kind)?;
    let entity_type = EntityType::parse(&row.entity_type)?;

    let created_at = row
        .created_at
        .parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(&row.created_at, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("corrupt created_at '{}' on notification '{}': {}", row.created_at, row.id, e);
            chrono::DateTime::default()
        });

    Some(NotificationItem {
        id,
        actor_id,
        kind,
        entity_type,
        entity_id,
        message: row.message,
        is_read: row.is_read,
        created_at,
    })
}
