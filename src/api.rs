use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::item::Item;
use crate::orchestrator::{Pipeline, PipelineSnapshot};

const DEFAULT_PUBLISHED_LIMIT: usize = 20;
const MAX_PUBLISHED_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/pipeline/health", get(pipeline_health))
        .route("/pipeline/published", get(pipeline_published))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn pipeline_health(State(state): State<AppState>) -> Json<PipelineSnapshot> {
    Json(state.pipeline.snapshot())
}

#[derive(Debug, Deserialize)]
struct PublishedQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PublishedOut {
    count: usize,
    items: Vec<Item>,
}

/// Most recent publications, newest first.
async fn pipeline_published(
    State(state): State<AppState>,
    Query(q): Query<PublishedQuery>,
) -> Json<PublishedOut> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_PUBLISHED_LIMIT)
        .clamp(1, MAX_PUBLISHED_LIMIT);
    let items = state.pipeline.recent_published(limit);
    Json(PublishedOut {
        count: items.len(),
        items,
    })
}
