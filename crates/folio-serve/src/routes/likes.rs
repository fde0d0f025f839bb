//! Like counts for projects and blog posts.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use folio_core::EntityId;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters / request body naming the liked entity.
#[derive(Debug, Clone, Deserialize)]
pub struct LikeTarget {
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
}

impl LikeTarget {
    fn entity_id(&self) -> Result<EntityId, ApiError> {
        let raw = self
            .project_id
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("projectId is required".to_string()))?;
        Ok(EntityId::parse(raw)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LikesResponse {
    likes: u64,
}

/// `GET /api/likes?projectId=...`
pub async fn get_likes(
    State(state): State<AppState>,
    Query(target): Query<LikeTarget>,
) -> Result<Json<LikesResponse>, ApiError> {
    let id = target.entity_id()?;
    let likes = state.likes.get_likes(&id)?;
    Ok(Json(LikesResponse { likes }))
}

/// `POST /api/likes` with `{"projectId": ...}`
///
/// Returns the new count. If the increment was dropped the current count is
/// returned instead, so the client never sees a failure for a lost like.
pub async fn like(
    State(state): State<AppState>,
    payload: Result<Json<LikeTarget>, JsonRejection>,
) -> Result<Json<LikesResponse>, ApiError> {
    let Json(target) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let id = target.entity_id()?;

    let likes = match state.likes.like(&id).await {
        Some(count) => count,
        None => state.likes.get_likes(&id)?,
    };

    tracing::debug!(id = %id, likes, "like recorded");
    Ok(Json(LikesResponse { likes }))
}
