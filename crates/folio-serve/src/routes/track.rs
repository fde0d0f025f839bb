//! Page-view and click tracking.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use folio_core::TrackEvent;
use metrics::counter;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct TrackResponse {
    ok: bool,
}

/// `POST /api/track`
///
/// Accepts `{"type": "pageview", "page": ...}` or
/// `{"type": "click", "clickType": ..., "target": ...}`. Only a malformed
/// payload fails; a dropped increment still answers `{"ok": true}`.
pub async fn track(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<TrackResponse>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let event = TrackEvent::from_json(body)?;

    counter!("http_track_events_total", "type" => event.kind()).increment(1);
    state.analytics.track(&event).await;

    Ok(Json(TrackResponse { ok: true }))
}
