// src/metrics.rs
use anyhow::Result;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder (first call only) and describe our series.
/// Later calls return the same handle.
pub fn install() -> Result<PrometheusHandle> {
    HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            describe();
            Ok::<_, anyhow::Error>(handle)
        })
        .cloned()
}

fn describe() {
    describe_counter!("polyseek_runs_total", "Analysis runs by depth and outcome");
    describe_counter!(
        "polyseek_provider_errors_total",
        "Signal provider failures and timeouts"
    );
    describe_counter!("polyseek_llm_calls_total", "Language-model calls by stage");
    describe_counter!(
        "polyseek_llm_repairs_total",
        "Repair prompts issued after invalid model output"
    );
    describe_counter!(
        "polyseek_evidence_dropped_total",
        "Evidence records dropped as duplicates or over budget"
    );
    describe_histogram!(
        "polyseek_llm_latency_ms",
        Unit::Milliseconds,
        "Language-model call latency"
    );
}

/// `/metrics` in the Prometheus exposition format.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    )
}
