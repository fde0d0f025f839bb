//! API route definitions.

mod admin;
mod health;
mod likes;
mod stats;
mod track;
mod well_known;

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::require_admin;
use crate::state::AppState;

pub use well_known::NostrDocument;

/// Build the complete router.
///
/// # Route Structure
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /.well-known/nostr.json` - NIP-05 identities
/// - `GET /.well-known/lnurlp/{user}` - Lightning address pay request
///
/// ## API (`Cache-Control: no-store`)
/// - `POST /api/track` - Record a page view or click
/// - `GET /api/likes` - Like count for `projectId`
/// - `POST /api/likes` - Like `projectId`
/// - `GET /api/stats` - Aggregate analytics report
/// - `GET /api/memoato-stats` - External stats snapshot
///
/// ## Admin (bearer token)
/// - `POST /api/admin/flush` - Delete all stored data
pub fn router(state: AppState) -> Router {
    let well_known = Router::new()
        .route("/nostr.json", get(well_known::nostr_json))
        .route("/lnurlp/{user}", get(well_known::lnurlp))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any));

    let admin = Router::new()
        .route("/flush", post(admin::flush))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let api = Router::new()
        .route("/track", post(track::track))
        .route("/likes", get(likes::get_likes).post(likes::like))
        .route("/stats", get(stats::report))
        .route("/memoato-stats", get(stats::memoato_stats))
        .nest("/admin", admin)
        .layer(middleware::map_response(add_cache_headers));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/.well-known", well_known)
        .nest("/api", api)
        .with_state(state)
}

/// Counters change on every request, so API responses must never be cached.
async fn add_cache_headers(response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    parts
        .headers
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Response::from_parts(parts, body)
}
