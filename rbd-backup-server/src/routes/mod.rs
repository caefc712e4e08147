pub mod jobs;
pub mod pools;
pub mod repos;

use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/jobs", jobs::router(state.clone()))
        .nest("/api/pools", pools::router(state.clone()))
        .nest("/api/repos", repos::router(state.clone()))
        .route("/health", get(health))
        .route("/ws", get(crate::ws::events::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let store = if state.config.uses_sqlite() { "sqlite" } else { "redis" };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": store,
        "rbd": state.config.rbd_bin.display().to_string(),
        "running_jobs": state.jobs.running_count().await,
    }))
}
