use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use uuid::Uuid;

use sprout_types::api::{CreatePostRequest, PostResponse};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::Claims;

/// Minimal post creation so toggles and comments have targets. The rest of
/// the post surface (feeds, search, media) lives outside this service.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("post content must not be empty".into()));
    }

    let post_id = Uuid::new_v4();

    let db = state.db.clone();
    let author = claims.sub;
    let content = req.content.clone();
    tokio::task::spawn_blocking(move || db.create_post(post_id, author, &content))
        .await
        .map_err(|e| ApiError::Transaction(anyhow::anyhow!("join error: {}", e)))??;

    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            id: post_id,
            author_id: claims.sub,
            content: req.content,
            created_at: chrono::Utc::now(),
        }),
    ))
}
