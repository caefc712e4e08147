use crate::error::AppError;
use crate::models::cluster::{Image, Pool, Snapshot};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_pools))
        .route("/{pool}/images", get(list_images))
        .route(
            "/{pool}/images/{image}/snapshots",
            get(list_snapshots).post(create_snapshot),
        )
        .route(
            "/{pool}/images/{image}/snapshots/{timestamp}",
            delete(remove_snapshot),
        )
}

async fn list_pools(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Pool>>, AppError> {
    Ok(Json(state.cluster.list_pools().await?))
}

async fn list_images(
    State(state): State<Arc<AppState>>,
    Path(pool): Path<String>,
) -> Result<Json<Vec<Image>>, AppError> {
    Ok(Json(state.cluster.list_images(&pool).await?))
}

async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Path((pool, image)): Path<(String, String)>,
) -> Result<Json<Vec<Snapshot>>, AppError> {
    Ok(Json(state.cluster.list_snapshots(&pool, &image).await?))
}

async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    Path((pool, image)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Snapshot>), AppError> {
    let snapshot = state.cluster.create_snapshot(&pool, &image).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn remove_snapshot(
    State(state): State<Arc<AppState>>,
    Path((pool, image, timestamp)): Path<(String, String, u64)>,
) -> Result<StatusCode, AppError> {
    state.cluster.remove_snapshot(&pool, &image, timestamp).await?;
    Ok(StatusCode::NO_CONTENT)
}
