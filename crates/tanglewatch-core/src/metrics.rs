//! Prometheus metrics helpers for the Tanglewatch system.
//!
//! Centralized metrics initialization and the metric names used across
//! components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tanglewatch_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("feed_frames_total", "category" => "tx").increment(1);
//! }
//! ```
//!
//! # Naming conventions
//!
//! - Prefix by component: `feed_`, `dedup_`, `endpoint_`, `transport_`
//! - Suffix by type: `_total` for counters
//! - Labels are limited to category and endpoint to keep cardinality down

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded.
/// Returns a handle for [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed instead of panicking. Useful for tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the given port. Spawns a background
/// task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();
    });

    Ok(())
}

/// Register descriptions for the metrics used across Tanglewatch.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    describe_counter!(
        "feed_frames_total",
        "Classified frames received (labels: category, endpoint)"
    );
    describe_counter!(
        "feed_frames_dropped_total",
        "Frames dropped for an unrecognized or truncated tag"
    );
    describe_counter!(
        "feed_events_total",
        "Per-endpoint per-category event counter increments"
    );
    describe_counter!(
        "feed_duplicates_total",
        "Frames whose identifier was already in the dedup cache"
    );

    describe_gauge!(
        "dedup_segments",
        "Retained dedup segments per category chain"
    );
    describe_gauge!(
        "dedup_identifiers",
        "Identifiers held across a category chain's segments"
    );
    describe_counter!(
        "dedup_segments_purged_total",
        "Segments discarded by the purge loop"
    );

    describe_gauge!(
        "endpoint_workers_active",
        "Endpoints currently in the Reading state"
    );
    describe_counter!(
        "endpoint_launches_total",
        "Worker launches, including relaunches after failure"
    );
    describe_counter!(
        "transport_errors_total",
        "Dial and receive failures (label: stage)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    // Ensure metrics are initialized exactly once for all tests
    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one install can succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }
}
