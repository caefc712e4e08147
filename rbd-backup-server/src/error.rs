use crate::services::cluster::ClusterError;
use crate::services::orchestrator::JobError;
use crate::services::repo_registry::RepoError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadGateway(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::BadGateway(m) => {
                tracing::warn!("Cluster error: {m}");
                (StatusCode::BAD_GATEWAY, m.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => AppError::NotFound(format!("{id} not found")),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<JobError> for AppError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Invalid(m) => AppError::BadRequest(m),
            JobError::NotFound(_) => AppError::NotFound("Job not found".into()),
            e @ JobError::NotRunning(_) => AppError::Conflict(e.to_string()),
            JobError::Store(e) => e.into(),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(_) => AppError::NotFound("Repository not found".into()),
            RepoError::InvalidPath(m) => AppError::BadRequest(m),
            e @ RepoError::Space { .. } => AppError::Internal(e.into()),
            RepoError::Store(e) => e.into(),
        }
    }
}

impl From<ClusterError> for AppError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::Invalid(m) => AppError::BadRequest(m),
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::from(JobError::Invalid("bad".into())), StatusCode::BAD_REQUEST),
            (AppError::from(JobError::NotFound("x".into())), StatusCode::NOT_FOUND),
            (AppError::from(JobError::NotRunning("x".into())), StatusCode::CONFLICT),
            (
                AppError::from(JobError::Store(StoreError::Backend("down".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::from(RepoError::NotFound("r".into())), StatusCode::NOT_FOUND),
            (AppError::from(ClusterError::Invalid("p".into())), StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
