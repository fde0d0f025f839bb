//! `/.well-known` identity documents (NIP-05 and LUD-16).

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct NostrQuery {
    pub name: Option<String>,
}

/// NIP-05 identity document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NostrDocument {
    pub names: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub relays: BTreeMap<String, Vec<String>>,
}

/// `GET /.well-known/nostr.json?name=...`
///
/// With `name`, only that identity is returned (possibly none). Without it,
/// every configured identity is listed.
pub async fn nostr_json(
    State(state): State<AppState>,
    Query(query): Query<NostrQuery>,
) -> Json<NostrDocument> {
    let config = &state.config;

    let names: BTreeMap<String, String> = match query.name.as_deref() {
        Some(name) => {
            let name = name.to_lowercase();
            config
                .nostr_names
                .get(&name)
                .map(|pubkey| (name, pubkey.clone()))
                .into_iter()
                .collect()
        }
        None => config.nostr_names.as_ref().clone(),
    };

    let relays = if config.nostr_relays.is_empty() {
        BTreeMap::new()
    } else {
        names
            .values()
            .map(|pubkey| (pubkey.clone(), config.nostr_relays.clone()))
            .collect()
    };

    Json(NostrDocument { names, relays })
}

/// LNURL error body (`{"status": "ERROR", "reason": ...}`).
#[derive(Debug, Clone, Serialize)]
struct LnurlError {
    status: &'static str,
    reason: String,
}

fn lnurl_error(status: StatusCode, reason: impl Into<String>) -> Response {
    let body = LnurlError {
        status: "ERROR",
        reason: reason.into(),
    };
    (status, Json(body)).into_response()
}

/// Failure resolving the upstream pay document.
#[derive(Debug, thiserror::Error)]
enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream document is not a payRequest")]
    NotPayRequest,
}

/// Check that an upstream document is a usable LUD-06 pay request.
fn validate_pay_request(doc: &Value) -> Result<(), UpstreamError> {
    let is_pay = doc.get("tag").and_then(Value::as_str) == Some("payRequest");
    let has_callback = doc
        .get("callback")
        .and_then(Value::as_str)
        .is_some_and(|cb| !cb.is_empty());

    if is_pay && has_callback {
        Ok(())
    } else {
        Err(UpstreamError::NotPayRequest)
    }
}

async fn fetch_pay_request(client: &reqwest::Client, url: &str) -> Result<Value, UpstreamError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(UpstreamError::Status(status.as_u16()));
    }

    let doc: Value = response.json().await?;
    validate_pay_request(&doc)?;
    Ok(doc)
}

/// `GET /.well-known/lnurlp/{user}`
///
/// Proxies the pay request of the configured Lightning address.
pub async fn lnurlp(State(state): State<AppState>, Path(user): Path<String>) -> Response {
    let Some(address) = state.config.lightning_address.as_ref() else {
        return lnurl_error(StatusCode::NOT_FOUND, "Lightning address not configured");
    };

    if !user.eq_ignore_ascii_case(&address.username) {
        return lnurl_error(StatusCode::NOT_FOUND, format!("Unknown user: {user}"));
    }

    let url = address.lnurlp_url();
    match fetch_pay_request(&state.http, &url).await {
        Ok(doc) => Json(doc).into_response(),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "lightning address resolution failed");
            lnurl_error(StatusCode::BAD_GATEWAY, "Failed to resolve Lightning address")
        }
    }
}
