//! Application metrics for Prometheus monitoring.
//!
//! The jobs crate records through the `metrics` facade; this module installs
//! the Prometheus recorder, describes the metrics, and renders them for
//! `/metrics`.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "questline_job_runs_total",
        "Reconciliation job runs by job type and final status"
    );
    describe_histogram!(
        "questline_job_duration_seconds",
        "Wall time of reconciliation job runs in seconds"
    );
    describe_counter!(
        "questline_sweep_sessions_total",
        "Stale sessions handled by the sweep, by outcome"
    );
    describe_counter!(
        "questline_sync_sessions_total",
        "Completed sessions handled by sync, by outcome"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}
