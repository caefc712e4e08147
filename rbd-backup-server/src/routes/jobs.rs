use crate::error::AppError;
use crate::models::job::{Job, JobReport, Task};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/{id}", get(get_job).delete(delete_job))
        .route("/{id}/progress", get(get_progress))
        .route("/{id}/cancel", post(cancel_job))
}

#[derive(Deserialize)]
struct ListQuery {
    length: Option<usize>,
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Job>>, AppError> {
    Ok(Json(state.jobs.list(query.length).await?))
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(task): Json<Task>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    let job = state.jobs.submit(task).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobReport>, AppError> {
    Ok(Json(state.jobs.get_status(&id).await?))
}

async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<String, AppError> {
    Ok(state.jobs.progress(&id).await?.to_string())
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.jobs.cancel(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.jobs.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
