use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use sprout_types::api::ToggleResponse;
use sprout_types::models::RelationKind;

use crate::auth::AppState;
use crate::engine::EngineError;
use crate::error::ApiError;
use crate::middleware::Claims;

/// `POST /toggle/{kind}/{target_id}` — flips the relationship and returns
/// the new state. Idempotent under retry: two identical calls land on
/// opposite states, never on an error.
pub async fn toggle(
    State(state): State<AppState>,
    Path((kind, target_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = RelationKind::parse(&kind)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown toggle kind '{kind}'")))?;

    let outcome = state
        .engine
        .toggle(kind, claims.sub, target_id)
        .await
        .map_err(|e| match e {
            EngineError::NotFound => ApiError::NotFound,
            EngineError::Transaction(e) => ApiError::Transaction(e),
        })?;

    Ok(Json(ToggleResponse {
        active: outcome.active,
    }))
}
