//! Aggregate analytics and the external stats snapshot.

use axum::Json;
use axum::extract::{Query, State};
use folio_core::{Snapshot, StatsReport};
use serde::Deserialize;

use crate::cache::get_or_compute;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/stats`
///
/// Page views, click counts and the most recent clicks. Served from a
/// short-lived in-process cache.
pub async fn report(State(state): State<AppState>) -> Result<Json<StatsReport>, ApiError> {
    let limit = state.config.recent_clicks;
    let report = get_or_compute(&state.report_cache, "stats_report", || async {
        state.analytics.report(limit).map_err(ApiError::from)
    })
    .await?;

    Ok(Json(report))
}

/// Query parameters for the external snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotQuery {
    /// `1` / `true` forces an upstream fetch.
    pub refresh: Option<String>,
}

impl SnapshotQuery {
    fn force_refresh(&self) -> bool {
        matches!(self.refresh.as_deref(), Some("1" | "true" | "yes"))
    }
}

/// `GET /api/memoato-stats?refresh=1`
///
/// The cached (or freshly fetched) snapshot, or `null` when none is available.
pub async fn memoato_stats(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Json<Option<Snapshot>> {
    Json(state.stats.get_snapshot(query.force_refresh()).await)
}
