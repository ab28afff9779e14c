//! Feed pulse service entrypoint.
//! Loads config, starts the ingest/publish loops and serves the HTTP surface.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_pulse::metrics::Metrics;
use feed_pulse::{api, JsonlStore, LogStore, Pipeline, PipelineConfig, PipelineStore};

/// When set, records are appended as JSON lines under this directory.
const ENV_STORE_DIR: &str = "PIPELINE_STORE_DIR";

/// Compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - PIPELINE_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("PIPELINE_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pipeline=info,ingest=info,store=info,warn"));

    // Shuttle may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

fn build_store() -> Arc<dyn PipelineStore> {
    match std::env::var(ENV_STORE_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let store = JsonlStore::new(dir);
            tracing::info!(target: "store", dir = %store.dir().display(), "appending records as json lines");
            Arc::new(store)
        }
        _ => Arc::new(LogStore),
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    // Recorder first so the loops' first cycle is counted.
    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "metrics endpoint disabled");
            None
        }
    };

    let cfg = PipelineConfig::load_default()?;
    let pipeline = Arc::new(Pipeline::from_config(cfg, build_store())?);

    // Dropping the handle leaves both loops running for the process lifetime.
    let _handle = pipeline.clone().start().await;

    let mut router = api::router(api::AppState::new(pipeline));
    if let Some(m) = metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
