use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// Register help text for every pipeline metric. Idempotent.
pub fn describe_pipeline_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "pipeline_items_fetched_total",
            "New raw items accepted from the feed after dedup and safety filtering."
        );
        describe_counter!(
            "pipeline_items_deduped_total",
            "Fetched items dropped because their id was already known."
        );
        describe_counter!(
            "pipeline_items_filtered_unsafe_total",
            "Fetched items dropped by the content-safety setting."
        );
        describe_counter!("pipeline_items_published_total", "Items published.");
        describe_counter!(
            "pipeline_fetch_errors_total",
            "Fetch calls that ended degraded or rate limited."
        );
        describe_counter!("pipeline_fetch_retries_total", "Fetch retries performed.");
        describe_counter!(
            "pipeline_stage_failures_total",
            "Stage invocations that failed (label: stage)."
        );
        describe_histogram!(
            "pipeline_stage_duration_ms",
            "Stage invocation time in milliseconds (label: stage)."
        );
        describe_gauge!(
            "pipeline_queue_depth",
            "Items waiting at a stage's input status (label: stage)."
        );
        describe_gauge!("pipeline_working_set_size", "Items in the working set.");
        describe_gauge!(
            "pipeline_backoff_multiplier",
            "Current ingestion interval multiplier."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;
        describe_pipeline_metrics();
        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
