//! Prometheus metrics helpers.
//!
//! # Usage
//!
//! ```rust,ignore
//! use folio_core::metrics::{init_metrics, start_metrics_server};
//!
//! let handle = init_metrics();
//! start_metrics_server(9091, handle).await?;
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component (`counter_`, `stats_cache_`, `http_`)
//! - Suffix: unit or type (`_total`)
//! - Labels: low cardinality only (category, outcome, type); never page paths

use axum::{Router, routing::get};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Returns `None` if a recorder is already installed (e.g. in tests).
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    try_init_metrics().expect("Failed to install Prometheus recorder")
}

/// Serve `/metrics` on `port` in a background task.
///
/// Binding happens before this returns, so a busy port is reported to the caller.
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) -> std::io::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

/// Register descriptions for every metric folio records.
fn register_metrics() {
    // =========================================================================
    // Counters
    // =========================================================================

    describe_counter!(
        "counter_increments_total",
        "Counter increments committed (label: category)"
    );
    describe_counter!(
        "counter_cas_conflicts_total",
        "Compare-and-set conflicts that caused a retry"
    );
    describe_counter!(
        "counter_increment_dropped_total",
        "Increments abandoned after store errors or retry exhaustion (label: category)"
    );

    // =========================================================================
    // External stats cache
    // =========================================================================

    describe_counter!(
        "stats_cache_hits_total",
        "Snapshot requests served from the cache without an upstream fetch"
    );
    describe_counter!(
        "stats_cache_refresh_total",
        "Upstream snapshot refresh attempts (label: outcome)"
    );

    // =========================================================================
    // HTTP
    // =========================================================================

    describe_counter!(
        "http_track_events_total",
        "Tracking events accepted by the API (label: type)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;

    #[test]
    fn test_try_init_metrics_idempotent() {
        // First call may or may not succeed (depends on test order)
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_registered_metrics_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            counter!("counter_increments_total", "category" => "likes").increment(2);
            counter!("stats_cache_refresh_total", "outcome" => "failed").increment(1);
        });

        let rendered = handle.render();
        assert!(rendered.contains("counter_increments_total{category=\"likes\"} 2"));
        assert!(rendered.contains("stats_cache_refresh_total{outcome=\"failed\"} 1"));
        assert!(rendered.contains("# HELP counter_increments_total"));
    }
}
