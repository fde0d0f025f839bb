//! Bearer token authentication for admin routes.

use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

/// Middleware that requires a valid admin Bearer token.
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// Tokens are validated against `FOLIO_ADMIN_TOKENS`. With no tokens
/// configured every request is rejected.
pub async fn require_admin(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    let Some(token) = token else {
        tracing::debug!("missing or malformed authorization header");
        return Err(ApiError::Unauthorized);
    };

    if !state.config.admin_tokens.contains(token) {
        tracing::debug!("invalid admin token");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}
