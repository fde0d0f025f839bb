//! Administrative operations (bearer-token protected).

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    deleted: u64,
}

/// `POST /api/admin/flush`
///
/// Deletes every counter, click event and cached snapshot.
pub async fn flush(State(state): State<AppState>) -> Result<Json<FlushResponse>, ApiError> {
    let deleted = state.store.clear()?;
    state.report_cache.invalidate_all();

    tracing::warn!(deleted, "store flushed by admin");
    Ok(Json(FlushResponse { deleted }))
}
