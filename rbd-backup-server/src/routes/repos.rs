use crate::error::AppError;
use crate::models::repository::{CreateRepositoryRequest, Repository};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_repos).post(create_repo))
        .route("/{id}", get(get_repo).delete(delete_repo))
}

async fn list_repos(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Repository>>, AppError> {
    Ok(Json(state.repos.list().await?))
}

async fn create_repo(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRepositoryRequest>,
) -> Result<(StatusCode, Json<Repository>), AppError> {
    let repo = state.repos.add(body).await?;
    Ok((StatusCode::CREATED, Json(repo)))
}

async fn get_repo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Repository>, AppError> {
    Ok(Json(state.repos.resolve(&id).await?))
}

async fn delete_repo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !state.repos.delete(&id).await? {
        return Err(AppError::NotFound("Repository not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}
